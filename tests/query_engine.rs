mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use common::{Harness, error_codes};
use ens_subgraph_compat::services::graphql::GuardrailLimits;
use ens_subgraph_compat::services::graphql::orm::{FirstLimitPolicy, PaginationLimits};

fn ids(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn first_two_by_name_with_owner() {
    let harness = Harness::new().await;
    let envelope = harness
        .query("{ domains(first: 2, orderBy: name, orderDirection: asc) { id name owner { id } } }")
        .await;

    assert_eq!(
        envelope["data"],
        json!({
            "domains": [
                { "id": "d-dave", "name": "Dave.eth", "owner": { "id": "0xccc" } },
                { "id": "d-alice", "name": "alice.eth", "owner": { "id": "0xaaa" } },
            ]
        })
    );
    assert!(envelope.get("errors").is_none());
    assert!(harness.recorder.calls() <= 2);
}

#[tokio::test]
async fn missing_entity_is_null_without_errors() {
    let harness = Harness::new().await;
    let envelope = harness.query(r#"{ domain(id: "nonexistent") { id name } }"#).await;

    assert_eq!(envelope["data"], json!({ "domain": null }));
    assert!(envelope.get("errors").is_none());
}

#[tokio::test]
async fn big_integer_filters_are_exact() {
    let harness = Harness::new().await;

    let envelope = harness
        .query(r#"{ domains(where: { expiryDate_gt: "1700000000" }) { id expiryDate } }"#)
        .await;
    assert_eq!(
        envelope["data"]["domains"],
        json!([
            { "id": "d-alice", "expiryDate": "1700000001" },
            { "id": "d-carol", "expiryDate": "18446744073709551617" },
            { "id": "d-dave", "expiryDate": "9007199254740993" },
        ])
    );

    // 2^53 + 1 must not collapse onto 2^53
    let envelope = harness
        .query(r#"{ domains(where: { expiryDate_gt: "9007199254740992" }) { id } }"#)
        .await;
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-carol", "d-dave"]);

    let envelope = harness
        .query(r#"{ domains(where: { expiryDate_lte: "9007199254740993" }) { id } }"#)
        .await;
    assert_eq!(
        ids(&envelope["data"]["domains"]),
        vec!["d-alice", "d-bob", "d-dave"]
    );
}

#[tokio::test]
async fn windows_slice_the_full_ordering() {
    let harness = Harness::new().await;
    let full = harness.query("{ domains(orderBy: name) { id } }").await;
    let full = ids(&full["data"]["domains"]);
    assert_eq!(full, vec!["d-dave", "d-alice", "d-bob", "d-carol", "d-eth"]);

    for first in 0..=6usize {
        for skip in 0..=6usize {
            let envelope = harness
                .query(&format!(
                    "{{ domains(orderBy: name, first: {}, skip: {}) {{ id }} }}",
                    first, skip
                ))
                .await;
            let expected: Vec<String> = full.iter().skip(skip).take(first).cloned().collect();
            assert_eq!(ids(&envelope["data"]["domains"]), expected, "first={} skip={}", first, skip);
        }
    }
}

#[tokio::test]
async fn ties_break_by_ascending_id() {
    let harness = Harness::new().await;

    let envelope = harness
        .query("{ domains(orderBy: createdAt, orderDirection: desc) { id } }")
        .await;
    assert_eq!(
        ids(&envelope["data"]["domains"]),
        vec!["d-dave", "d-alice", "d-bob", "d-carol", "d-eth"]
    );

    let envelope = harness
        .query("{ domains(orderBy: createdAt, orderDirection: asc) { id } }")
        .await;
    assert_eq!(
        ids(&envelope["data"]["domains"]),
        vec!["d-eth", "d-alice", "d-bob", "d-carol", "d-dave"]
    );
}

#[tokio::test]
async fn sibling_relations_share_one_query_per_edge() {
    let harness = Harness::new().await;
    let envelope = harness
        .query("{ domains { id owner { id } registrant { id } } }")
        .await;

    assert!(envelope.get("errors").is_none());
    assert_eq!(envelope["data"]["domains"].as_array().unwrap().len(), 5);

    let statements = harness.recorder.statements();
    assert_eq!(statements.len(), 3, "{:#?}", statements);
    assert!(statements[0].contains("FROM \"domains\""));
    assert!(statements[1..].iter().all(|sql| sql.contains("FROM \"accounts\"")));
}

#[tokio::test]
async fn nested_relations_batch_per_level() {
    let harness = Harness::new().await;
    let envelope = harness
        .query(r#"{ domain(id: "d-eth") { subdomains(orderBy: name) { name owner { id } } } }"#)
        .await;

    assert_eq!(
        envelope["data"]["domain"]["subdomains"],
        json!([
            { "name": "Dave.eth", "owner": { "id": "0xccc" } },
            { "name": "alice.eth", "owner": { "id": "0xaaa" } },
            { "name": "bob.eth", "owner": { "id": "0xbbb" } },
            { "name": "carol.eth", "owner": { "id": "0xbbb" } },
        ])
    );
    assert_eq!(harness.recorder.calls(), 3);
}

#[tokio::test]
async fn to_many_windows_apply_per_parent() {
    let harness = Harness::new().await;
    let envelope = harness.query("{ accounts { id domains(first: 1) { id } } }").await;

    assert_eq!(
        envelope["data"]["accounts"],
        json!([
            { "id": "0xaaa", "domains": [{ "id": "d-alice" }] },
            { "id": "0xbbb", "domains": [{ "id": "d-bob" }] },
            { "id": "0xccc", "domains": [{ "id": "d-dave" }] },
        ])
    );
    assert_eq!(harness.recorder.calls(), 2);

    let envelope = harness
        .query(r#"{ account(id: "0xbbb") { domains(orderBy: name, orderDirection: desc) { name } } }"#)
        .await;
    assert_eq!(
        envelope["data"]["account"]["domains"],
        json!([{ "name": "carol.eth" }, { "name": "bob.eth" }])
    );
}

#[tokio::test]
async fn reverse_to_one_relations() {
    let harness = Harness::new().await;
    let envelope = harness
        .query(
            r#"{
                alice: domain(id: "d-alice") {
                    registration { id cost }
                    wrappedDomain { id }
                    resolver { address addr { id } }
                }
                carol: domain(id: "d-carol") { wrappedDomain { id fuses owner { id } } }
            }"#,
        )
        .await;

    assert_eq!(
        envelope["data"],
        json!({
            "alice": {
                "registration": { "id": "r-alice", "cost": "5000000000000000000" },
                "wrappedDomain": null,
                "resolver": { "address": "0x1234", "addr": { "id": "0xaaa" } },
            },
            "carol": {
                "wrappedDomain": { "id": "w-carol", "fuses": 65537, "owner": { "id": "0xbbb" } },
            },
        })
    );
}

#[tokio::test]
async fn string_and_reference_filters() {
    let harness = Harness::new().await;

    let envelope = harness
        .query(r#"{ domains(where: { name_starts_with_nocase: "DAVE" }) { id } }"#)
        .await;
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-dave"]);

    let envelope = harness
        .query(r#"{ domains(where: { name_ends_with: ".eth", isMigrated: false }) { id } }"#)
        .await;
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-bob", "d-dave"]);

    let envelope = harness
        .query(r#"{ domains(where: { or: [{ name: "eth" }, { owner: "0xccc" }] }) { id } }"#)
        .await;
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-dave", "d-eth"]);

    let envelope = harness
        .query(r#"{ domains(where: { owner_in: ["0xbbb"], name_not: "bob.eth" }) { id } }"#)
        .await;
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-carol"]);

    let envelope = harness
        .query(r#"{ domains(where: { expiryDate: null }) { id } }"#)
        .await;
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-eth"]);
}

#[tokio::test]
async fn guardrail_violation_never_reaches_the_store() {
    let harness = Harness::with_limits(
        PaginationLimits::default(),
        GuardrailLimits {
            max_depth: 2,
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;

    let envelope = harness.query("{ domains { owner { id } } }").await;
    assert_eq!(envelope["data"], Value::Null);
    assert_eq!(error_codes(&envelope), vec!["GUARDRAIL_VIOLATION"]);
    assert_eq!(harness.recorder.calls(), 0);

    let envelope = harness.query("{ domains { id } }").await;
    assert!(envelope.get("errors").is_none());
    assert_eq!(harness.recorder.calls(), 1);
}

#[tokio::test]
async fn validation_errors_skip_the_store() {
    let harness = Harness::new().await;

    let envelope = harness.query("{ domains(where: { or: [] }) { id } }").await;
    assert_eq!(error_codes(&envelope), vec!["VALIDATION_ERROR"]);
    assert_eq!(envelope["errors"][0]["path"], json!(["domains"]));

    let envelope = harness.query("{ domains(first: 1001) { id } }").await;
    assert_eq!(error_codes(&envelope), vec!["VALIDATION_ERROR"]);

    let envelope = harness.query("{ domains(skip: -1) { id } }").await;
    assert_eq!(error_codes(&envelope), vec!["VALIDATION_ERROR"]);

    assert_eq!(harness.recorder.calls(), 0);
}

#[tokio::test]
async fn first_can_be_clamped() {
    let harness = Harness::with_limits(
        PaginationLimits {
            max_first: 2,
            first_policy: FirstLimitPolicy::Clamp,
            ..Default::default()
        },
        GuardrailLimits::default(),
        Duration::from_secs(5),
    )
    .await;

    let envelope = harness.query("{ domains(first: 10) { id } }").await;
    assert!(envelope.get("errors").is_none());
    assert_eq!(ids(&envelope["data"]["domains"]), vec!["d-alice", "d-bob"]);
}

#[tokio::test]
async fn failed_batch_only_nulls_its_fields() {
    let harness = Harness::new().await;
    harness.recorder.fail_on("FROM \"accounts\"");

    let envelope = harness
        .query("{ domains(orderBy: name) { id registrant { id } } registrations { id } }")
        .await;

    assert_eq!(ids(&envelope["data"]["registrations"]), vec!["r-alice", "r-bob"]);
    let domains = envelope["data"]["domains"].as_array().unwrap();
    assert_eq!(domains.len(), 5);
    assert!(domains.iter().all(|d| d.get("registrant") == Some(&Value::Null)));

    let codes = error_codes(&envelope);
    assert_eq!(codes, vec!["DATA_STORE_ERROR", "DATA_STORE_ERROR"]);
    let mut positions: Vec<u64> = Vec::new();
    for error in envelope["errors"].as_array().unwrap() {
        let path = error["path"].as_array().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], "domains");
        assert_eq!(path[2], "registrant");
        positions.push(path[1].as_u64().unwrap());
        let message = error["message"].as_str().unwrap();
        assert!(!message.contains("accounts"));
        assert!(!message.contains("injected"));
    }
    positions.sort();
    // alice and bob have registrants, ordered by name behind Dave.eth
    assert_eq!(positions, vec![1, 2]);
}

#[tokio::test]
async fn failed_non_null_field_nulls_nearest_nullable_parent() {
    let harness = Harness::new().await;
    harness.recorder.fail_on("FROM \"accounts\"");

    let envelope = harness
        .query(
            r#"{
                a: domain(id: "d-alice") { id reg: registration { id registrant { id } } }
                b: domain(id: "d-bob") { id owner { id } }
            }"#,
        )
        .await;

    assert_eq!(
        envelope["data"],
        json!({ "a": { "id": "d-alice", "reg": null }, "b": null })
    );
    assert_eq!(error_codes(&envelope), vec!["DATA_STORE_ERROR", "DATA_STORE_ERROR"]);
    let mut paths: Vec<Value> = envelope["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|error| error["path"].clone())
        .collect();
    paths.sort_by_key(|path| path.to_string());
    assert_eq!(
        paths,
        vec![json!(["a", "reg", "registrant"]), json!(["b", "owner"])]
    );
}

#[tokio::test]
async fn failed_non_null_field_under_root_list_nulls_data() {
    let harness = Harness::new().await;
    harness.recorder.fail_on("FROM \"accounts\"");

    let envelope = harness.query("{ registrations { id registrant { id } } }").await;

    assert_eq!(envelope["data"], Value::Null);
    assert_eq!(error_codes(&envelope), vec!["DATA_STORE_ERROR", "DATA_STORE_ERROR"]);
    for error in envelope["errors"].as_array().unwrap() {
        assert_eq!(error["path"][0], "registrations");
        assert_eq!(error["path"][2], "registrant");
    }
}

#[tokio::test]
async fn executor_errors_are_validation_errors() {
    let harness = Harness::new().await;

    for query in [
        "{ domains { id nope } }",
        "{ domains(where: { bogus: 1 }) { id } }",
        "{ domains(where: { isMigrated_gt: true }) { id } }",
        "{ domains(orderBy: nope) { id } }",
        "{ domains {",
        "{ domains { ...A } } fragment A on Domain { parent { ...B } } fragment B on Domain { parent { ...A } }",
    ] {
        let envelope = harness.query(query).await;
        let codes = error_codes(&envelope);
        assert!(!codes.is_empty(), "{}", query);
        assert!(codes.iter().all(|code| code == "VALIDATION_ERROR"), "{}: {:?}", query, codes);
        assert_eq!(envelope["data"], Value::Null, "{}", query);
    }
    assert_eq!(harness.recorder.calls(), 0);
}

#[tokio::test]
async fn one_request_reads_one_snapshot() {
    let harness = Harness::on_disk().await;
    harness.recorder.write_after_next(
        &harness.pool,
        "INSERT INTO domains (id, name, subdomain_count, is_migrated, created_at, owner_id) VALUES ('d-zed', 'zed.eth', 0, 0, '300', '0xaaa')",
    );

    let query = r#"{ account(id: "0xaaa") { domains { id } } }"#;
    let envelope = harness.query(query).await;
    assert!(envelope.get("errors").is_none(), "{}", envelope);
    assert_eq!(
        ids(&envelope["data"]["account"]["domains"]),
        vec!["d-alice", "d-eth"]
    );
    assert_eq!(harness.recorder.calls(), 2);

    // the write landed, later requests see it
    let envelope = harness.query(query).await;
    assert_eq!(
        ids(&envelope["data"]["account"]["domains"]),
        vec!["d-alice", "d-eth", "d-zed"]
    );
}

#[tokio::test]
async fn slow_requests_time_out() {
    let harness = Harness::with_limits(
        PaginationLimits::default(),
        GuardrailLimits::default(),
        Duration::from_millis(50),
    )
    .await;
    harness.recorder.delay(Duration::from_millis(500));

    let envelope = harness.query("{ domains { id owner { id } } }").await;
    assert_eq!(envelope["data"], Value::Null);
    assert_eq!(error_codes(&envelope), vec!["TIMEOUT"]);

    // nothing keeps loading for the abandoned request
    tokio::time::sleep(Duration::from_millis(700)).await;
    let statements = harness.recorder.statements();
    assert_eq!(statements.len(), 1, "{:#?}", statements);
    assert!(statements[0].contains("FROM \"domains\""));
}

#[tokio::test]
async fn timed_out_requests_issue_no_further_batches() {
    let harness = Harness::with_limits(
        PaginationLimits::default(),
        GuardrailLimits::default(),
        Duration::from_millis(100),
    )
    .await;
    harness.recorder.delay_on("FROM \"accounts\"", Duration::from_millis(400));

    let envelope = harness
        .query("{ domains { id owner { id domains { id } } } }")
        .await;
    assert_eq!(error_codes(&envelope), vec!["TIMEOUT"]);

    // the in-flight owner batch finishes; the level below it is never flushed
    tokio::time::sleep(Duration::from_millis(800)).await;
    let statements = harness.recorder.statements();
    assert_eq!(statements.len(), 2, "{:#?}", statements);
    assert!(statements[0].contains("FROM \"domains\""));
    assert!(statements[1].contains("FROM \"accounts\""));
}
