//! The process-wide facade. Everything here shares one registry, so it is a
//! single test.

use serde_json::json;
use sqlscope::global;
use sqlscope::models::{DatabaseSpec, DbOptions, NamingStrategy, QueryDescriptor};
use sqlscope::DbError;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_global_facade() {
    // Nothing registered yet
    let err = global::execute(&QueryDescriptor::rows("SELECT 1")).await.unwrap_err();
    assert!(matches!(err, DbError::NoConnectionConfigured));
    assert!(matches!(global::rollback(), Err(DbError::NoActiveTransaction)));

    let first = NamedTempFile::new().unwrap();
    let second = NamedTempFile::new().unwrap();
    let h1 = global::create_handle(DatabaseSpec::sqlite(first.path().to_string_lossy()));
    let h2 = global::create_handle(
        DatabaseSpec::sqlite(second.path().to_string_lossy())
            .with_options(DbOptions::default().with_naming(NamingStrategy::kebab_case())),
    );
    global::set_default(h1.clone());
    global::set_default(h2.clone());

    global::execute(&QueryDescriptor::count(
        "CREATE TABLE users (user_id INTEGER PRIMARY KEY, display_name TEXT)",
    ))
    .await
    .unwrap();

    global::transaction(async {
        assert!(global::current_connection().unwrap().handle().same_as(&h2));
        global::execute(
            &QueryDescriptor::keys("INSERT INTO users (display_name) VALUES (?)").with_param("Ada"),
        )
        .await?;
        global::transaction(async {
            global::execute(
                &QueryDescriptor::keys("INSERT INTO users (display_name) VALUES (?)")
                    .with_param("Grace"),
            )
            .await
        })
        .await?;
        assert!(!global::is_rollback_only()?);
        Ok(())
    })
    .await
    .unwrap();
    assert!(global::current_connection().is_none());

    // Rows come back through the second handle's naming strategy
    let names = global::stream(
        1,
        &QueryDescriptor::rows("SELECT display_name FROM users ORDER BY user_id"),
        async |cursor| {
            let mut names = Vec::new();
            while let Some(record) = cursor.next().await? {
                names.push(record);
            }
            Ok(names)
        },
    )
    .await
    .unwrap();
    assert_eq!(
        names,
        vec![json!({"display-name": "Ada"}), json!({"display-name": "Grace"})]
    );

    // The first database never saw the table
    let err = global::execute(&QueryDescriptor::rows("SELECT * FROM users").on(&h1))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
}
