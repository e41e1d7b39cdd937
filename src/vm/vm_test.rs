use super::*;
use crate::engine::EngineContext;
use crate::index::tree::TreeIndex;
use crate::mem::Payload;
use crate::space::{Space, SpaceDef};
use crate::tuple::{FieldDef, FieldType, KeyDef, KeyPart, TupleFormat};
use crate::vm::dispatch::StepOutcome;
use crate::vm::opcode::{ArithOp, CompareFlags, CompareOp, Opcode};
use std::sync::Arc;

fn setup(engine: &mut EngineContext) {
    let fmt = TupleFormat::new(
        vec![
            FieldDef { name: "id".into(), field_type: FieldType::Unsigned, is_nullable: false },
            FieldDef { name: "val".into(), field_type: FieldType::Str, is_nullable: false },
        ],
        vec![0],
    );
    let kd = Arc::new(KeyDef::new(vec![KeyPart::new(0, FieldType::Unsigned)], true).unwrap());
    let pk = Box::new(TreeIndex::new("primary", kd));
    let space = Space::new(
        SpaceDef { id: 1, name: "s".into(), field_count: 2, is_temporary: false, is_local: false },
        fmt,
        vec![pk],
    )
    .unwrap();
    engine
        .cache_mut()
        .cache_replace(None, Some(std::rc::Rc::new(std::cell::RefCell::new(space))))
        .unwrap();
}

fn encoded_row(id: u64, val: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    rmp::encode::write_array_len(&mut buf, 2).unwrap();
    rmp::encode::write_uint(&mut buf, id).unwrap();
    rmp::encode::write_str(&mut buf, val).unwrap();
    buf
}

#[test]
fn arithmetic_overflow_falls_back_to_floating_point() {
    let mut engine = EngineContext::new();
    let program = vec![
        Opcode::Integer { value: i64::MAX, dst: 0 },
        Opcode::Integer { value: 1, dst: 1 },
        Opcode::Arith { op: ArithOp::Add, lhs: 0, rhs: 1, dst: 2 },
        Opcode::ResultRow { start: 2, n: 1 },
    ];
    let mut vm = Vm::new(&mut engine, program, 4);
    match vm.run().unwrap() {
        StepOutcome::ResultRow(row) => {
            assert!(matches!(row[0].payload(), Payload::Double(_)));
        }
        _ => panic!("expected a result row"),
    }
}

#[test]
fn division_by_zero_yields_null() {
    let mut engine = EngineContext::new();
    let program = vec![
        Opcode::Integer { value: 10, dst: 0 },
        Opcode::Integer { value: 0, dst: 1 },
        Opcode::Arith { op: ArithOp::Divide, lhs: 0, rhs: 1, dst: 2 },
        Opcode::ResultRow { start: 2, n: 1 },
    ];
    let mut vm = Vm::new(&mut engine, program, 4);
    match vm.run().unwrap() {
        StepOutcome::ResultRow(row) => assert!(row[0].is_null()),
        _ => panic!("expected a result row"),
    }
}

#[test]
fn compare_then_jump_takes_the_matching_branch() {
    let mut engine = EngineContext::new();
    let program = vec![
        Opcode::Integer { value: 5, dst: 0 },
        Opcode::Integer { value: 5, dst: 1 },
        Opcode::Compare { start_a: 0, start_b: 1, n: 1, permute: false },
        Opcode::Jump { lt: 10, eq: 4, gt: 10 },
        Opcode::Integer { value: 42, dst: 2 },
        Opcode::ResultRow { start: 2, n: 1 },
    ];
    let mut vm = Vm::new(&mut engine, program, 4);
    match vm.run().unwrap() {
        StepOutcome::ResultRow(row) => assert_eq!(row[0].as_i64(), Some(42)),
        _ => panic!("expected a result row"),
    }
}

#[test]
fn eq_comparison_respects_nulleq_flag() {
    let mut engine = EngineContext::new();
    let program = vec![
        Opcode::Null { first: 0, last: 0 },
        Opcode::Null { first: 1, last: 1 },
        Opcode::Compare2 {
            op: CompareOp::Eq,
            lhs: 0,
            rhs: 1,
            target: 2,
            flags: CompareFlags::Nulleq,
            store_p2: true,
        },
        Opcode::ResultRow { start: 2, n: 1 },
    ];
    let mut vm = Vm::new(&mut engine, program, 4);
    match vm.run().unwrap() {
        StepOutcome::ResultRow(row) => assert_eq!(row[0].as_f64(), Some(1.0)),
        _ => panic!("expected a result row"),
    }
}

#[test]
fn insert_then_select_round_trips_through_the_index_layer() {
    let mut engine = EngineContext::new();
    setup(&mut engine);
    let raw = encoded_row(7, "hello");
    let program = vec![
        Opcode::OpenWrite { cursor: 0, space_id: 1, iid: 0 },
        Opcode::Blob { value: raw, dst: 0 },
        Opcode::IdxInsert { cursor: 0, reg: 0 },
        Opcode::Close { cursor: 0 },
        Opcode::OpenRead { cursor: 1, space_id: 1, iid: 0 },
        Opcode::Rewind { cursor: 1, target_if_empty: 9 },
        Opcode::Column { cursor: 1, field_no: 1, dst: 5, default: None },
        Opcode::ResultRow { start: 5, n: 1 },
        Opcode::Halt { rc: 0, message: None },
        Opcode::Halt { rc: 1, message: Some("no rows".into()) },
    ];
    let mut vm = Vm::new(&mut engine, program, 10);
    match vm.run().unwrap() {
        StepOutcome::ResultRow(row) => assert_eq!(row[0].as_str(), Some("hello")),
        StepOutcome::Halted { rc, message } => panic!("expected a result row, halted instead: rc={} message={:?}", rc, message),
        StepOutcome::Continue => panic!("expected a result row, got Continue"),
    }
}

#[test]
fn savepoint_rollback_undoes_statements_issued_after_it() {
    let mut engine = EngineContext::new();
    let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let program = vec![
        Opcode::Savepoint { op: crate::vm::opcode::SavepointOp::Begin, name: Some("s".into()) },
        Opcode::Savepoint { op: crate::vm::opcode::SavepointOp::Rollback, name: Some("s".into()) },
        Opcode::Halt { rc: 0, message: None },
    ];
    let mut vm = Vm::new(&mut engine, program, 1);

    // Opcode 0: Savepoint BEGIN — marks the current (empty) statement list.
    vm.step().unwrap();

    // A statement issued *after* the mark must be undone by the rollback.
    let idx = vm.txn.begin_statement();
    let log2 = log.clone();
    vm.txn.statement_mut(idx).on_rollback(Box::new(move || {
        log2.borrow_mut().push("undone");
        Ok(())
    }));

    // Opcode 1: Savepoint ROLLBACK.
    vm.step().unwrap();
    assert_eq!(*log.borrow(), vec!["undone"]);
}
