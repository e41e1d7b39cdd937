use super::*;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn commit_runs_before_commit_then_commit_in_statement_order() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut txn = Transaction::new();
    for i in 0..3 {
        let idx = txn.begin_statement();
        let stmt = txn.statement_mut(idx);
        let log1 = log.clone();
        stmt.on_before_commit(Box::new(move || {
            log1.borrow_mut().push(format!("before-{}", i));
            Ok(())
        }));
        let log2 = log.clone();
        stmt.on_commit(Box::new(move || {
            log2.borrow_mut().push(format!("commit-{}", i));
            Ok(())
        }));
    }
    txn.commit().unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["before-0", "before-1", "before-2", "commit-0", "commit-1", "commit-2"]
    );
}

// Property: "Savepoint BEGIN s; ...; Savepoint ROLLBACK s" undoes every
// statement issued after the BEGIN, in reverse order.
#[test]
fn rollback_to_savepoint_undoes_later_statements_in_reverse() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut txn = Transaction::new();

    let idx0 = txn.begin_statement();
    let log0 = log.clone();
    txn.statement_mut(idx0)
        .on_rollback(Box::new(move || {
            log0.borrow_mut().push(0);
            Ok(())
        }));

    let sp = txn.savepoint(Some("s".into()));

    for i in 1..3 {
        let idx = txn.begin_statement();
        let logi = log.clone();
        txn.statement_mut(idx).on_rollback(Box::new(move || {
            logi.borrow_mut().push(i);
            Ok(())
        }));
    }

    txn.rollback_to_savepoint(sp).unwrap();
    assert_eq!(*log.borrow(), vec![2, 1]);
}

#[test]
fn transaction_rollback_runs_every_statement_in_reverse() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut txn = Transaction::new();
    for i in 0..2 {
        let idx = txn.begin_statement();
        let logi = log.clone();
        txn.statement_mut(idx).on_rollback(Box::new(move || {
            logi.borrow_mut().push(i);
            Ok(())
        }));
    }
    txn.rollback().unwrap();
    assert_eq!(*log.borrow(), vec![1, 0]);
}
