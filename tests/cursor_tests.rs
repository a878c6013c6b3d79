mod common;

use common::{schema, schema_with, usernames};
use rust_mapper::{
    attributes, Error, Filters, Predicate, QueryOptions, SchemaOptions, SqlQuery, Value,
};
use serde_json::json;

#[tokio::test]
async fn test_all_and_count() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();
    assert_eq!(users.all(None).await.unwrap().len(), 7);
    assert_eq!(users.count(None).await.unwrap(), 7);
}

#[tokio::test]
async fn test_extended_where() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let like = users
        .filter(Filters::new().with_condition("password", Predicate::Like("123%".into())))
        .unwrap();
    assert_eq!(
        usernames(&like.all(None).await.unwrap()),
        vec!["fred", "robert", "sally"]
    );

    let annie = users
        .filter(
            Filters::new()
                .with_condition("username", Predicate::Like("an%".into()))
                .with_condition("password", Predicate::Like("12%".into())),
        )
        .unwrap()
        .only_one(None)
        .await
        .unwrap();
    assert_eq!(annie.get_str("username"), Some("annie"));

    let below_five = users
        .filter(Filters::new().with_condition("id", Predicate::LessThan(5.into())))
        .unwrap();
    assert_eq!(below_five.count(None).await.unwrap(), 4);

    let not_fred = users
        .filter(Filters::new().with_condition("username", Predicate::NotEqual("fred".into())))
        .unwrap();
    assert_eq!(not_fred.count(None).await.unwrap(), 6);

    let ranged = users
        .filter(
            Filters::new()
                .with_condition("id", Predicate::GreaterThanOrEqual(2.into()))
                .unset("id")
                .with_condition("id", Predicate::GreaterThan(5.into())),
        )
        .unwrap();
    assert_eq!(usernames(&ranged.all(None).await.unwrap()), vec!["sally", "tom"]);
}

#[tokio::test]
async fn test_in_and_raw_conditions() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let ids = Value::List(vec![1.into(), 2.into(), 3.into()]);
    let within = users
        .filter(Filters::new().with_condition("id", Predicate::from_operator("in", ids.clone()).unwrap()))
        .unwrap();
    assert_eq!(
        usernames(&within.all(None).await.unwrap()),
        vec!["annie", "billy", "fred"]
    );

    let outside = users
        .filter(Filters::new().with_condition("id", Predicate::from_operator("not in", ids).unwrap()))
        .unwrap();
    assert_eq!(outside.count(None).await.unwrap(), 4);

    let empty = users
        .filter(Filters::new().with_condition("id", Predicate::In(vec![])))
        .unwrap();
    assert_eq!(empty.count(None).await.unwrap(), 0);

    let err = Predicate::from_operator("in", Value::from(1)).unwrap_err();
    assert_eq!(err.to_string(), "'in' requires an array");

    let short_names = users
        .filter(Filters::new().with_condition(
            "ignored",
            Predicate::Raw("length(\"user\".\"username\") = 3".into()),
        ))
        .unwrap();
    assert_eq!(usernames(&short_names.all(None).await.unwrap()), vec!["tom"]);
}

#[tokio::test]
async fn test_filter_purity() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let base = users
        .filter(Filters::new().with_condition("id", Predicate::LessThan(5.into())))
        .unwrap();
    let narrowed = base.filter(Filters::new().eq("username", "fred")).unwrap();

    assert_eq!(base.count(None).await.unwrap(), 4);
    assert_eq!(narrowed.count(None).await.unwrap(), 1);
    assert_eq!(users.count(None).await.unwrap(), 7);
    assert_eq!(base.filters().len(), 1);

    let widened = narrowed.filter(Filters::new().unset("username")).unwrap();
    assert_eq!(widened.count(None).await.unwrap(), 4);
    assert_eq!(narrowed.count(None).await.unwrap(), 1);

    let untouched = narrowed.filter(Filters::new()).unwrap();
    assert_eq!(untouched.filters(), narrowed.filters());
    assert!(narrowed.clear_filters().filters().is_empty());
    assert_eq!(narrowed.clear().count(None).await.unwrap(), 7);
}

#[tokio::test]
async fn test_boolean_filters_are_normalized() {
    let schema = schema().await;
    let admins = schema
        .cursor("user")
        .unwrap()
        .filter(Filters::new().eq("is_admin", true))
        .unwrap();
    assert_eq!(
        admins.filters().get("is_admin"),
        Some(&Predicate::Equal(Value::Integer(1)))
    );
    assert_eq!(usernames(&admins.all(None).await.unwrap()), vec!["annie"]);
}

#[tokio::test]
async fn test_object_values_need_serialization() {
    let schema = schema().await;
    let meta = schema.cursor("meta").unwrap();
    let err = meta
        .filter(Filters::new().eq("value", json!({"theme": "dark"})))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "The value for value is an object, and serialization is turned off"
    );
    let err = meta
        .create(attributes([("key", Value::from("k")), ("value", Value::from(json!({"a": 1})))]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = meta
        .filter(Filters::new().eq("value", Value::List(vec![1.into()])))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_object_values_serialized() {
    let schema = schema_with(SchemaOptions::new().with_serialize_objects(true)).await;
    let meta = schema.cursor("meta").unwrap();

    let settings = meta
        .create(
            attributes([
                ("key", Value::from("settings")),
                ("value", Value::from(json!({"theme": "dark"}))),
            ]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(settings.get_str("value"), Some(r#"{"theme":"dark"}"#));

    let found = meta
        .filter(Filters::new().eq("value", json!({"theme": "dark"})))
        .unwrap()
        .only_one(None)
        .await
        .unwrap();
    assert_eq!(found.get_str("key"), Some("settings"));
}

#[tokio::test]
async fn test_cardinality_checks() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let annie = users
        .filter(Filters::new().eq("id", 3))
        .unwrap()
        .one(None)
        .await
        .unwrap();
    assert_eq!(annie.unwrap().get_str("username"), Some("annie"));

    let nobody = users.filter(Filters::new().eq("username", "nobody")).unwrap();
    assert!(nobody.one(None).await.unwrap().is_none());
    nobody.none(None).await.unwrap();
    let err = nobody.only_one(None).await.unwrap_err();
    assert_eq!(err.to_string(), "A call to only_one() for user yielded no result.");

    let shared_password = users.filter(Filters::new().eq("password", "a")).unwrap();
    let err = shared_password.one(None).await.unwrap_err();
    assert_eq!(err.to_string(), "A call to one() for user yielded multiple results.");
    let err = shared_password.only_one(None).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "A call to only_one() for user yielded multiple results."
    );
    let err = shared_password.none(None).await.unwrap_err();
    assert_eq!(err.to_string(), "A call to none() for user yielded results.");

    // still usable after a failure
    assert_eq!(shared_password.count(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_first_and_options() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let last = users
        .options(QueryOptions::new().with_order("id", false))
        .first(None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.get_str("username"), Some("tom"));

    let limited = users.options(QueryOptions::new().with_limit(2));
    assert_eq!(limited.all(None).await.unwrap().len(), 2);
    assert_eq!(limited.query_options().limit, Some(2));
    assert_eq!(limited.clear_options().all(None).await.unwrap().len(), 7);
    assert_eq!(users.query_options(), &QueryOptions::default());

    let nobody = users
        .filter(Filters::new().eq("username", "nobody"))
        .unwrap()
        .first(None)
        .await
        .unwrap();
    assert!(nobody.is_none());
}

#[tokio::test]
async fn test_with_one_to_many() {
    let schema = schema().await;
    let jimmy = schema
        .cursor("user")
        .unwrap()
        .filter(Filters::new().eq("id", 5))
        .unwrap()
        .with(["sent_messages", "received_messages"])
        .unwrap()
        .only_one(None)
        .await
        .unwrap();

    let sent = jimmy.many("sent_messages").unwrap();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|m| m.get_i64("sender_id") == Some(5)));
    assert_eq!(jimmy.many("received_messages").unwrap().len(), 2);
    assert_eq!(jimmy.related("sent_messages").unwrap().len(), 3);
}

#[tokio::test]
async fn test_with_keeps_unmatched_parents() {
    let schema = schema().await;
    let users = schema
        .cursor("user")
        .unwrap()
        .with(["user_prefs"])
        .unwrap()
        .all(None)
        .await
        .unwrap();
    assert_eq!(users.len(), 7);

    let fred = users.iter().find(|u| u.get_i64("id") == Some(1)).unwrap();
    assert_eq!(
        fred.one("user_pref").unwrap().get_str("font"),
        Some("comic sans")
    );
    let annie = users.iter().find(|u| u.get_i64("id") == Some(3)).unwrap();
    assert!(annie.one("user_pref").is_none());
    assert_eq!(annie.many("user_prefs").map(|prefs| prefs.len()), Some(0));
}

#[tokio::test]
async fn test_with_chains() {
    let schema = schema().await;

    let free = schema
        .cursor("role")
        .unwrap()
        .filter(Filters::new().eq("name", "Free User"))
        .unwrap()
        .with(["user_role:user"])
        .unwrap()
        .only_one(None)
        .await
        .unwrap();
    assert_eq!(usernames(free.many("users").unwrap()), vec!["fred", "jimmy"]);
    assert_eq!(free.many("user_roles").unwrap().len(), 2);

    let robert = schema
        .cursor("user")
        .unwrap()
        .filter(Filters::new().eq("username", "robert"))
        .unwrap()
        .with(["user_role:role"])
        .unwrap()
        .only_one(None)
        .await
        .unwrap();
    assert_eq!(
        robert.one("role").unwrap().get_str("name"),
        Some("Administrator")
    );
}

#[tokio::test]
async fn test_with_validation() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let err = users.with(["banned_ips"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Relation banned_ips is not defined for cursor user (no relation banned_ips on user)."
    );
    let err = users.with(["user_role:banned_ips"]).unwrap_err();
    assert!(matches!(err, Error::UnknownRelation { .. }));


    let with_prefs = users.with(["user_prefs"]).unwrap();
    assert_eq!(with_prefs.relations(), ["user_prefs".to_string()]);
    assert!(with_prefs.with(Vec::<&str>::new()).unwrap().relations().is_empty());
    assert!(with_prefs.clear_relations().joins().is_empty());
    assert!(users.relations().is_empty());

    let twice = with_prefs.with(["user_prefs", "user_role:role"]).unwrap();
    assert_eq!(twice.joins().len(), 3);
    assert_eq!(twice.query_spec().joins[2].parent, "user_role");
}

#[tokio::test]
async fn test_repeated_segments_are_aliased_by_path() {
    let schema = schema().await;

    let fred = schema
        .cursor("user")
        .unwrap()
        .filter(Filters::new().eq("id", 1))
        .unwrap()
        .with(["user_role:user"])
        .unwrap();
    let aliases: Vec<&str> = fred.joins().iter().map(|j| j.alias.as_str()).collect();
    assert_eq!(aliases, ["user_role", "user_role/user"]);
    let fred = fred.only_one(None).await.unwrap();
    let back = fred.related("user_role/user").unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].get_str("username"), Some("fred"));

    let messages = schema
        .cursor("message")
        .unwrap()
        .with(["sender:user_role", "recipient:user_role"])
        .unwrap();
    let spec = messages.query_spec();
    assert_eq!(spec.joins.len(), 4);
    assert_eq!(spec.joins[3].alias, "recipient/user_role");
    assert_eq!(spec.joins[3].parent, "recipient");

    // fred (role 1) writes to jimmy (role 1)
    let m4 = messages
        .filter(Filters::new().eq("uuid", "m4"))
        .unwrap()
        .only_one(None)
        .await
        .unwrap();
    assert_eq!(m4.related("user_role").unwrap()[0].get_i64("user_id"), Some(1));
    assert_eq!(
        m4.related("recipient/user_role").unwrap()[0].get_i64("user_id"),
        Some(5)
    );
}

#[tokio::test]
async fn test_first_with_relations_keeps_children() {
    let schema = schema().await;
    let jimmy = schema
        .cursor("user")
        .unwrap()
        .filter(Filters::new().eq("id", 5))
        .unwrap()
        .with(["sent_messages"])
        .unwrap()
        .first(None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jimmy.many("sent_messages").unwrap().len(), 3);
}

#[tokio::test]
async fn test_create() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();

    let newbie = users
        .create(attributes([("username", "newbie"), ("password", "pw")]), None)
        .await
        .unwrap();
    assert_eq!(newbie.get_i64("id"), Some(8));
    assert_eq!(newbie.get_bool("is_admin"), Some(false));
    assert!(newbie.get_str("date_created").is_some());
    assert_eq!(users.count(None).await.unwrap(), 8);

    let merged = users
        .filter(Filters::new().eq("username", "merged"))
        .unwrap()
        .create(attributes([("password", "x")]), None)
        .await
        .unwrap();
    assert_eq!(merged.get_str("username"), Some("merged"));
    assert_eq!(merged.get_str("password"), Some("x"));

    let err = users
        .filter(Filters::new().with_condition("username", Predicate::Like("m%".into())))
        .unwrap()
        .create(attributes([("password", "x")]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_update_all() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();
    let shared = users.filter(Filters::new().eq("password", "a")).unwrap();

    let updated = shared
        .update_all(attributes([("password", "b")]), None)
        .await
        .unwrap();
    assert_eq!(usernames(&updated), vec!["billy", "jimmy"]);
    assert!(updated.iter().all(|u| u.get_str("password") == Some("b")));
    assert_eq!(shared.count(None).await.unwrap(), 0);
    assert_eq!(
        users
            .filter(Filters::new().eq("password", "b"))
            .unwrap()
            .count(None)
            .await
            .unwrap(),
        2
    );

    let none = shared
        .update_all(attributes([("password", "c")]), None)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_destroy_all() {
    let schema = schema().await;
    let messages = schema.cursor("message").unwrap();

    messages
        .destroy_all(Filters::new().eq("sender_id", 5), None)
        .await
        .unwrap();
    assert_eq!(messages.count(None).await.unwrap(), 3);

    let from_fred = messages.filter(Filters::new().eq("sender_id", 1)).unwrap();
    from_fred.destroy_all(Filters::new(), None).await.unwrap();
    assert_eq!(messages.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_result_cache() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();
    users.all(None).await.unwrap();
    assert!(users.results().is_empty());

    let schema = schema_with(SchemaOptions::new().with_cache_results(true)).await;
    let users = schema.cursor("user").unwrap();
    users.all(None).await.unwrap();
    assert_eq!(users.results().len(), 7);

    let objects = users.to_objects();
    assert_eq!(objects.as_array().map(Vec::len), Some(7));

    let derived = users.filter(Filters::new().eq("id", 1)).unwrap();
    assert!(derived.results().is_empty());
    derived.all(None).await.unwrap();
    assert_eq!(derived.results().len(), 1);
    assert_eq!(users.results().len(), 7);
}

#[tokio::test]
async fn test_in_transaction_cursor() {
    let schema = schema().await;
    let users = schema.cursor("user").unwrap();
    let users_ref = &users;

    schema
        .transaction(|txn| async move {
            let bound = users_ref.in_transaction(&txn);
            bound.create(attributes([("username", "zed")]), None).await?;
            assert_eq!(bound.count(None).await?, 8);
            assert_eq!(users_ref.query_options().transaction, None);
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();
    assert_eq!(users.count(None).await.unwrap(), 8);
}

#[tokio::test]
async fn test_cursor_raw() {
    let schema = schema().await;
    let rows = schema
        .cursor("role")
        .unwrap()
        .raw(&SqlQuery::new("SELECT COUNT(*) AS n FROM role"), None)
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], Value::Integer(3));
}
