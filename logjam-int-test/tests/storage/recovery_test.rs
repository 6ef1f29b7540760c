use logjam::bson::Bson;
use logjam::doc;
use logjam::storage::StorageConfigBuilder;
use logjam::store::{encode_record_key, CompareMode};
use logjam_int_test::test_util::{cleanup, create_context_with, create_test_context, run_test, user_config};

const IN_FLIGHT: u8 = 0;

#[test]
fn test_open_repairs_interrupted_write() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let mut ann = doc! { "name" => "ann", "tags" => vec!["old"] };
            storage.place(&mut ann)?;
            storage.close()?;

            // a write that reached the primary store but none of the indexes
            let engine = ctx.engine();
            let primary = engine.open_tree(&ctx.path().join("db.user.tcb"), CompareMode::Int64)?;
            let mut changed = ann.clone();
            changed.set_child("name", Bson::from("anne"));
            changed.set_child("tags", Bson::from(vec!["new"]));
            primary.place(&encode_record_key(1), &changed.to_binary())?;
            let journal = engine.open_tree(&ctx.path().join("journal.user.tcf"), CompareMode::Int64)?;
            journal.place(&encode_record_key(1), &[IN_FLIGHT])?;
            primary.close()?;
            journal.close()?;

            let reopened = ctx.reopen()?;
            assert!(reopened.filter("name", "anne")?.contains(1));
            assert!(reopened.tagged("tags", "new")?.contains(1));
            assert!(journal_is_empty(&ctx)?);
            reopened.close()?;
            Ok(())
        },
        cleanup,
    );
}

fn journal_is_empty(ctx: &logjam_int_test::test_util::TestContext) -> logjam::errors::LogjamResult<bool> {
    let journal = ctx
        .engine()
        .open_tree(&ctx.path().join("journal.user.tcf"), CompareMode::Int64)?;
    let empty = journal.is_empty()?;
    journal.close()?;
    Ok(empty)
}

#[test]
fn test_completed_writes_leave_journal_clean() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let mut ann = doc! { "name" => "ann" };
            storage.place(&mut ann)?;
            storage.remove(&mut ann)?;
            storage.checkpoint()?;
            assert!(journal_is_empty(&ctx)?);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_storage_without_journal() {
    run_test(
        || create_context_with(user_config().without_journal()),
        |ctx| {
            let storage = ctx.storage();
            assert!(storage.configuration().journal_file().is_none());
            let mut ann = doc! { "name" => "ann", "email" => "a@b" };
            storage.place(&mut ann)?;
            storage.checkpoint()?;

            let reopened = ctx.reopen()?;
            assert!(reopened.filter("email", "a@b")?.contains(1));
            reopened.close()?;
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_closed_storage_refuses_work() {
    run_test(
        || create_context_with(StorageConfigBuilder::new("plain")),
        |ctx| {
            let storage = ctx.storage();
            storage.close()?;
            assert!(storage.is_closed());
            let mut doc = doc! { "x" => 1 };
            assert!(storage.place(&mut doc).is_err());
            assert!(storage.all().is_err());
            Ok(())
        },
        cleanup,
    );
}
