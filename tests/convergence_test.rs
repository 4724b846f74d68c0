// Convergence tests for the session ingestion path
//
// Every permutation of delivering the same set of concurrently-created
// operations must leave the document identical, because each operation is
// transformed against the agreed log rather than a peer's speculative
// state.

use wren::ot::{Edit, Operation, Origin};
use wren::session::SessionManager;

fn op(origin: &str, rev: u64, edits: Vec<Edit>) -> Operation {
    Operation::new(Origin::Participant(origin.to_string()), rev, edits)
}

async fn content_after(seed: &str, ops: &[Operation]) -> String {
    let manager = SessionManager::new();
    let session = manager.open_with_content("doc", seed);
    for op in ops {
        session.ingest(op.clone()).await.unwrap();
    }
    let (content, _) = session.snapshot().await.unwrap();
    content
}

fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

#[tokio::test]
async fn concurrent_inserts_at_same_position_tie_break() {
    // Participant A and B both author against revision 0 of the same seed.
    let a = op("alice", 0, vec![Edit::insert(5, "x")]);
    let b = op("bob", 0, vec![Edit::insert(5, "y")]);

    let one = content_after("01234rest", &[a.clone(), b.clone()]).await;
    let two = content_after("01234rest", &[b, a]).await;

    assert_eq!(one, two);
    assert_eq!(one, "01234xyrest");
}

#[tokio::test]
async fn three_concurrent_operations_converge_in_all_orders() {
    let seed = "The quick brown fox";
    let ops = [
        op("alice", 0, vec![Edit::insert(4, "very ")]),
        op("bob", 0, vec![Edit::delete(10, 6)]), // "brown "
        op("carol", 0, vec![Edit::insert(19, "!")]),
    ];

    let reference = content_after(seed, &ops).await;
    for order in permutations(&ops) {
        let content = content_after(seed, &order).await;
        assert_eq!(content, reference, "diverged for order {order:?}");
    }
}

#[tokio::test]
async fn overlapping_deletes_remove_exactly_the_union() {
    let seed = "abcdefghij";
    let a = op("alice", 0, vec![Edit::delete(2, 4)]);
    let b = op("bob", 0, vec![Edit::delete(4, 4)]);

    let one = content_after(seed, &[a.clone(), b.clone()]).await;
    let two = content_after(seed, &[b, a]).await;

    assert_eq!(one, two);
    assert_eq!(one, "abij");
}

#[tokio::test]
async fn concurrent_inserts_against_a_deep_log_converge() {
    let manager = SessionManager::new();
    let session = manager.open_with_content("doc", "0123456789");

    // Ten operations land first, so both participants author at rev 10.
    for i in 0..10 {
        session.ingest(op("seed", i, vec![])).await.unwrap();
    }

    let a = session.ingest(op("alice", 10, vec![Edit::insert(5, "x")]));
    let applied_a = a.await.unwrap();
    assert_eq!(applied_a.revision, 11);

    let applied_b = session
        .ingest(op("bob", 10, vec![Edit::insert(5, "y")]))
        .await
        .unwrap();
    assert_eq!(applied_b.revision, 12);

    let (content, revision) = session.snapshot().await.unwrap();
    assert_eq!(revision, 12);
    assert_eq!(content, "01234xy56789");
}

#[tokio::test]
async fn mixed_human_and_synthetic_writers_converge() {
    let seed = "fn main() {}";
    let human = op("alice", 0, vec![Edit::insert(0, "// top\n")]);
    let synthetic = Operation::new(Origin::FixLoop, 0, vec![Edit::insert(12, " // end")]);

    let one = content_after(seed, &[human.clone(), synthetic.clone()]).await;
    let two = content_after(seed, &[synthetic, human]).await;
    assert_eq!(one, two);
}
