use logjam::doc;
use logjam::errors::ErrorKind;
use logjam_int_test::test_util::{cleanup, create_test_context, run_test};

#[test]
fn test_commit_spans_several_writes() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            storage.begin_transaction()?;
            let mut ann = doc! { "name" => "ann", "tags" => vec!["x"] };
            let mut bob = doc! { "name" => "bob", "tags" => vec!["x"] };
            storage.place(&mut ann)?;
            storage.place(&mut bob)?;
            assert!(storage.in_transaction());
            storage.commit_transaction()?;

            assert!(!storage.in_transaction());
            assert_eq!(storage.tagged("tags", "x")?.size(), 2);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_abort_discards_every_index() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let mut kept = doc! { "name" => "kept", "bio" => "stays" };
            storage.place(&mut kept)?;

            storage.begin_transaction()?;
            let mut dropped = doc! { "name" => "dropped", "bio" => "goes", "tags" => vec!["gone"] };
            storage.place(&mut dropped)?;
            storage.remove(&mut kept)?;
            storage.abort_transaction()?;

            assert_eq!(storage.count()?, 1);
            assert!(storage.filter("name", "kept")?.contains(1));
            assert!(storage.search("bio", "stays")?.contains(1));
            assert!(storage.filter("name", "dropped")?.is_empty());
            assert!(storage.search("bio", "goes")?.is_empty());
            assert!(storage.tagged("tags", "gone")?.is_empty());
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_transaction_misuse() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let err = storage.commit_transaction().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionError);
            let err = storage.abort_transaction().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionError);

            storage.begin_transaction()?;
            let err = storage.begin_transaction().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionError);
            // the failed nested begin leaves the outer transaction usable
            assert!(storage.in_transaction());
            storage.abort_transaction()?;
            Ok(())
        },
        cleanup,
    );
}
