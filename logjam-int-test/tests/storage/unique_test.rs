use logjam::bson::Bson;
use logjam::doc;
use logjam::errors::ErrorKind;
use logjam::storage::KEY_FIELD;
use logjam_int_test::test_util::{cleanup, create_test_context, run_test};

#[test]
fn test_duplicate_email_is_rejected() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let mut first = doc! { "name" => "A", "email" => "x@y", "tags" => vec!["t"] };
            storage.place(&mut first)?;

            let mut second = doc! { "name" => "B", "email" => "x@y", "tags" => vec!["t"] };
            let err = storage.place(&mut second).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::StorageError);
            assert_eq!(
                err.message(),
                "Unable to place record because of unique constraint [email]."
            );

            assert!(second.get(KEY_FIELD).is_none());
            assert_eq!(storage.count()?, 1);
            assert!(!storage.at(2)?.exists());
            assert!(storage.filter("name", "B")?.is_empty());
            assert_eq!(storage.tagged("tags", "t")?.size(), 1);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_freed_value_can_be_reused() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            let mut first = doc! { "email" => "x@y" };
            storage.place(&mut first)?;

            first.set_child("email", Bson::from("new@y"));
            storage.place(&mut first)?;

            let mut second = doc! { "email" => "x@y" };
            storage.place(&mut second)?;
            assert_eq!(storage.filter("email", "x@y")?.size(), 1);
            assert!(storage.filter("email", "x@y")?.contains(2));

            storage.remove(&mut first)?;
            let mut third = doc! { "email" => "new@y" };
            storage.place(&mut third)?;
            assert_eq!(storage.count()?, 2);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_documents_without_unique_field_are_accepted() {
    run_test(
        create_test_context,
        |ctx| {
            let storage = ctx.storage();
            for name in ["a", "b", "c"] {
                let mut user = doc! { "name" => name };
                storage.place(&mut user)?;
            }
            assert_eq!(storage.count()?, 3);
            Ok(())
        },
        cleanup,
    );
}
