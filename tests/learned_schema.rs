mod common;

use std::collections::BTreeMap;
use std::fs;

use common::{column, setup};
use restree::learned::{self, LearnedSchema};
use restree::{Method, Row};
use serde_json::json;
use tempfile::TempDir;

const REQUEST_SHAPE: &str = "/projects/P1/experiments/*";

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn listing() -> Vec<Row> {
    vec![
        row(&[
            ("xsiType", "xnat:mrSessionData"),
            ("URI", "/data/projects/P1/subjects/S1/experiments/E1"),
        ]),
        row(&[
            ("xsiType", "xnat:petSessionData"),
            ("URI", "/data/projects/P1/subjects/S2/experiments/E2"),
        ]),
        // rows without a type or a URI teach nothing
        row(&[("URI", "/data/projects/P1/subjects/S3/experiments/E3")]),
        row(&[("xsiType", "xnat:ctSessionData")]),
        row(&[("xsiType", ""), ("URI", "/data/projects/P1/subjects/S4/experiments/E4")]),
    ]
}

#[test]
fn tick_fires_on_multiples_when_enabled() {
    assert!(learned::tick_fires(30, 30, true));
    assert!(learned::tick_fires(0, 30, true));
    assert!(!learned::tick_fires(31, 30, true));
    assert!(!learned::tick_fires(30, 30, false));
    assert!(!learned::tick_fires(30, 0, true));
}

#[test]
fn learning_twice_is_learning_once() {
    let dir = TempDir::new().unwrap();
    let cache = LearnedSchema::load(dir.path()).unwrap();
    assert!(!cache.has_snapshot(REQUEST_SHAPE));

    let first = cache.learn("experiments", &listing(), REQUEST_SHAPE, "/data").unwrap();
    let on_disk = fs::read(cache.snapshot_path(REQUEST_SHAPE)).unwrap();
    let second = cache.learn("experiments", &listing(), REQUEST_SHAPE, "/data").unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read(cache.snapshot_path(REQUEST_SHAPE)).unwrap(), on_disk);
    assert_eq!(
        first,
        BTreeMap::from([
            (
                "/projects/P1/subjects/S1/experiments/*".to_string(),
                "xnat:mrSessionData".to_string()
            ),
            (
                "/projects/P1/subjects/S2/experiments/*".to_string(),
                "xnat:petSessionData".to_string()
            ),
        ])
    );
    assert_eq!(cache.len(), 2);
}

#[test]
fn new_observations_win_over_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let cache = LearnedSchema::load(dir.path()).unwrap();
    cache.learn("experiments", &listing(), REQUEST_SHAPE, "/data").unwrap();

    let retyped = vec![row(&[
        ("xsiType", "xnat:ctSessionData"),
        ("URI", "/data/projects/P1/subjects/S1/experiments/E1"),
    ])];
    let merged = cache.learn("experiments", &retyped, REQUEST_SHAPE, "/data").unwrap();
    assert_eq!(merged["/projects/P1/subjects/S1/experiments/*"], "xnat:ctSessionData");
    assert_eq!(merged["/projects/P1/subjects/S2/experiments/*"], "xnat:petSessionData");
    assert_eq!(
        cache.lookup("/projects/P1/subjects/S1/experiments/*").as_deref(),
        Some("xnat:ctSessionData")
    );
}

#[test]
fn node_name_replaces_the_listed_segment() {
    let dir = TempDir::new().unwrap();
    let cache = LearnedSchema::load(dir.path()).unwrap();
    // experiment listings of a project report the URIs of the archive
    let rows = vec![row(&[("xsiType", "xnat:mrSessionData"), ("URI", "/data/archive/E1")])];
    let learned = cache.learn("experiments", &rows, "/archive/*", "/data").unwrap();
    assert_eq!(learned.keys().collect::<Vec<_>>(), vec!["/experiments/*"]);
}

#[test]
fn snapshots_are_merged_at_load() {
    let dir = TempDir::new().unwrap();
    {
        let cache = LearnedSchema::load(dir.path()).unwrap();
        cache.learn("experiments", &listing(), REQUEST_SHAPE, "/data").unwrap();
    }
    fs::write(dir.path().join("broken.struct"), "not json").unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let reloaded = LearnedSchema::load(dir.path()).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert!(reloaded.has_snapshot(REQUEST_SHAPE));
    assert_eq!(
        reloaded.matching("/projects/P1/subjects/S2/experiments/E9"),
        vec!["xnat:petSessionData"]
    );
    assert_eq!(
        reloaded.first_match("/projects/P1/subjects/S1/experiments/E5").as_deref(),
        Some("xnat:mrSessionData")
    );
    assert!(reloaded.matching("/projects/P2/subjects/S1/experiments/E1").is_empty());
}

#[test]
fn first_listing_of_a_gatherable_node_learns() {
    let fixture = setup();
    let experiments = "/data/projects/P1/subjects/S1/experiments";
    fixture.transport.respond_table(
        experiments,
        json!([{"ID": "E1", "xsiType": "xnat:petSessionData"}]),
    );
    let collection = fixture
        .intf
        .select("/projects/P1/subjects/S1/experiments")
        .unwrap()
        .into_collection()
        .unwrap();

    assert_eq!(collection.iter().count(), 1);
    assert_eq!(
        fixture
            .intf
            .learned()
            .lookup("/projects/P1/subjects/S1/experiments/*")
            .as_deref(),
        Some("xnat:petSessionData")
    );

    // the snapshot exists now and the tick is off: no more xsiType column
    assert_eq!(collection.iter().count(), 1);
    assert_eq!(
        fixture.transport.uris(Method::Get),
        vec![
            format!("{experiments}?format=json&columns=ID,xsiType"),
            format!("{experiments}?format=json&columns=ID"),
        ]
    );
}

#[test]
fn learned_subtypes_narrow_element_queries() {
    let fixture = setup();
    let experiments = "/data/projects/P1/subjects/S1/experiments";
    fixture.transport.respond_table(
        experiments,
        json!([{"ID": "E1", "label": "baseline", "xsiType": "xnat:petSessionData"}]),
    );
    let collection = fixture.intf.select(experiments).unwrap().into_collection().unwrap();
    let experiment = collection.first().unwrap();

    assert_eq!(experiment.datatype().unwrap().as_deref(), Some("xnat:petSessionData"));
    assert_eq!(
        fixture.transport.uris(Method::Get).last().unwrap(),
        &format!("{experiments}?format=json&columns=xsiType,ID,label&xsiType=xnat:petSessionData")
    );
}

#[test]
fn listings_of_other_nodes_never_learn() {
    let fixture = setup();
    fixture
        .transport
        .respond_table("/data/projects/P1/subjects", column("ID", &["S1"]));
    let subjects = fixture.intf.select("/projects/P1/subjects").unwrap().into_collection().unwrap();
    assert_eq!(subjects.iter().count(), 1);
    assert!(fixture.intf.learned().is_empty());
    assert!(!fixture.intf.learned().has_snapshot("/projects/P1/subjects/*"));
}
