mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Fixture, column, names, setup, setup_with};
use restree::{Collection, Element, Fetched, Field, FieldValue, IdField, Method, RestreeError};
use serde_json::json;

const SUBJECTS: &str = "/data/projects/P1/subjects";

fn subjects(fixture: &Fixture) -> Collection {
    fixture
        .intf
        .select("/projects/P1/subjects")
        .unwrap()
        .into_collection()
        .unwrap()
}

#[test]
fn template_listing_issues_one_tabular_query() {
    let fixture = setup();
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));

    let members = subjects(&fixture).try_collect().unwrap();
    assert_eq!(names(&members), vec!["S1", "S2"]);
    assert_eq!(members[0].uri(), "/data/projects/P1/subjects/S1");
    assert_eq!(
        fixture.transport.uris(Method::Get),
        vec!["/data/projects/P1/subjects?format=json&columns=ID"]
    );
}

#[test]
fn glob_pattern_filters_identifiers() {
    let fixture = setup();
    fixture.transport.respond_table("/data/projects", column("ID", &["A1", "A2", "B1"]));

    let projects = fixture.intf.collection("projects").unwrap().with_pattern("A*");
    assert_eq!(projects.get(&[]), Fetched::Identifiers(vec!["A1".into(), "A2".into()]));
}

#[test]
fn columns_and_filters_reach_the_query_string() {
    let fixture = setup();
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1"]));

    let collection = subjects(&fixture)
        .with_columns(&["label", "ID", "gender"])
        .with_filter("group", "control")
        .with_filter("project", vec!["P1".to_string(), "P2".to_string()]);
    assert_eq!(collection.iter().count(), 1);
    assert_eq!(
        fixture.transport.uris(Method::Get),
        vec!["/data/projects/P1/subjects?format=json&columns=ID,label,gender&group=control&project=P1,P2"]
    );
}

#[test]
fn every_base_yields_elements() {
    let fixture = setup();
    let intf = &fixture.intf;
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));
    let expected = vec!["S1", "S2"];

    let template = subjects(&fixture);
    let uris = Collection::from_uris(
        vec![format!("{SUBJECTS}/S1"), "projects/P1/subjects/S2".to_string()],
        intf,
    );
    let elements = Collection::from_elements(
        vec![
            Element::new(&format!("{SUBJECTS}/S1"), intf),
            Element::new(&format!("{SUBJECTS}/S2"), intf),
        ],
        intf,
    );
    let wrapped = Collection::from_collection(template.clone());
    let many = Collection::from_collections(
        vec![
            Collection::from_uris(vec![format!("{SUBJECTS}/S1")], intf),
            Collection::from_uris(vec![format!("{SUBJECTS}/S2")], intf),
        ],
        intf,
    );

    for collection in [template, uris, elements, wrapped, many] {
        let members = collection.try_collect().unwrap();
        assert_eq!(names(&members), expected, "{collection:?}");
        assert!(members.iter().all(|e| e.node_name() == "subjects"));
    }
}

#[test]
fn nesting_flattens_one_level_per_child() {
    let fixture = setup();
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));
    fixture
        .transport
        .respond_table(&format!("{SUBJECTS}/S1/experiments"), column("ID", &["E1", "E2"]));
    fixture
        .transport
        .respond_table(&format!("{SUBJECTS}/S2/experiments"), column("ID", &["E3"]));

    let nested: Vec<String> = subjects(&fixture)
        .collection("experiments")
        .unwrap()
        .iter()
        .map(|e| e.uri().to_string())
        .collect();

    let mut manual = Vec::new();
    for subject in subjects(&fixture).iter() {
        for experiment in subject.collection("experiments").unwrap().iter() {
            manual.push(experiment.uri().to_string());
        }
    }
    assert_eq!(nested, manual);
    assert_eq!(nested.len(), 3);
    assert!(nested[0].ends_with("/subjects/S1/experiments/E1"));
}

#[test]
fn nested_pattern_applies_to_the_leaf_level() {
    let fixture = setup();
    fixture.transport.respond_table("/data/projects", column("ID", &["P1", "P2"]));
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "X1"]));
    fixture
        .transport
        .respond_table("/data/projects/P2/subjects", column("ID", &["S7"]));

    let leaves = fixture
        .intf
        .collection("projects")
        .unwrap()
        .collection_matching("subjects", "S*")
        .unwrap()
        .try_collect()
        .unwrap();
    assert_eq!(names(&leaves), vec!["S1", "S7"]);
}

#[test]
fn nested_template_filters_parents_and_children() {
    let fixture = setup();
    fixture.transport.respond_table("/data/projects", column("ID", &["P1", "X2"]));
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));

    let leaves = Collection::from_template("/data/projects", &fixture.intf)
        .with_nested("subjects")
        .with_pattern("*1")
        .try_collect()
        .unwrap();
    assert_eq!(names(&leaves), vec!["S1"]);
    assert_eq!(
        fixture.transport.uris(Method::Get),
        vec![
            "/data/projects?format=json&columns=ID",
            "/data/projects/P1/subjects?format=json&columns=ID"
        ]
    );
}

#[test]
fn get_shapes_follow_the_requested_fields() {
    let fixture = setup();
    fixture.transport.respond_table(
        "/data/projects",
        json!([
            {"ID": "P1", "secondary_ID": "first"},
            {"ID": "P2", "secondary_ID": "second"}
        ]),
    );
    let projects = fixture.intf.collection("projects").unwrap();

    assert_eq!(projects.get(&[]), Fetched::Identifiers(vec!["P1".into(), "P2".into()]));

    match projects.get(&[Field::Label]) {
        Fetched::Single(values) => assert_eq!(
            values,
            vec![FieldValue::Text("first".into()), FieldValue::Text("second".into())]
        ),
        other => panic!("unexpected {other:?}"),
    }

    match projects.get(&[Field::Id, Field::Label]) {
        Fetched::Tuples(tuples) => {
            assert_eq!(tuples.len(), 2);
            assert!(tuples.iter().all(|t| t.len() == 2));
            assert_eq!(tuples[1][0], FieldValue::Text("P2".into()));
            assert_eq!(tuples[1][1], FieldValue::Text("second".into()));
        }
        other => panic!("unexpected {other:?}"),
    }

    match projects.get(&[Field::Element]) {
        Fetched::Single(values) => {
            assert!(matches!(&values[0], FieldValue::Element(e) if e.uri() == "/data/projects/P1"))
        }
        other => panic!("unexpected {other:?}"),
    }

    let by_label = projects.with_id_field(IdField::Label);
    assert_eq!(by_label.first().unwrap().name(), "first");
}

#[test]
fn faults_degrade_to_empty_outside_debug_mode() {
    let fixture = setup();
    let collection = subjects(&fixture);
    assert!(collection.first().is_none());
    assert!(collection.try_collect().unwrap().is_empty());
}

#[test]
fn faults_surface_in_debug_mode() {
    let fixture = setup_with(|settings| settings.with_debug(true));
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));
    fixture
        .transport
        .respond_table(&format!("{SUBJECTS}/S1/experiments"), column("ID", &["E1"]));

    let experiments = subjects(&fixture).collection("experiments").unwrap();
    let mut elements = experiments.iter();
    assert_eq!(elements.next().map(|e| e.name().to_string()), Some("E1".to_string()));
    assert!(elements.next().is_none());
    assert!(matches!(elements.take_fault(), Some(RestreeError::Transport(_))));
    assert!(matches!(experiments.try_collect(), Err(RestreeError::Transport(_))));
}

#[test]
fn interrupt_ends_iteration_and_reconnects() {
    let fixture = setup();
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2", "S3"]));
    let collection = subjects(&fixture);

    let mut elements = collection.iter();
    assert_eq!(elements.next().unwrap().name(), "S1");
    fixture.intf.interrupt().raise();
    assert!(elements.next().is_none());
    assert!(elements.was_interrupted());
    assert!(elements.take_fault().is_none());
    assert_eq!(fixture.transport.reconnects(), 1);

    // the token is spent; the next pass runs to completion
    assert_eq!(collection.iter().count(), 3);
}

#[test]
fn callback_sees_every_yielded_element_once() {
    let fixture = setup();
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));
    fixture
        .transport
        .respond_table(&format!("{SUBJECTS}/S1/experiments"), column("ID", &["E1"]));
    fixture
        .transport
        .respond_table(&format!("{SUBJECTS}/S2/experiments"), column("ID", &["E2", "E3"]));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    fixture.intf.set_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let count = subjects(&fixture).collection("experiments").unwrap().iter().count();
    assert_eq!(count, 3);
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    fixture.intf.clear_callback();
    subjects(&fixture).iter().count();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn collection_tags_cover_every_member() {
    let fixture = setup();
    fixture.transport.respond_table(SUBJECTS, column("ID", &["S1", "S2"]));
    let collection = subjects(&fixture);

    collection.tag("cohort").unwrap();
    let tags = fixture.intf.tags();
    assert_eq!(tags.references("cohort").unwrap().len(), 2);

    collection.untag("cohort").unwrap();
    assert!(!tags.exists("cohort").unwrap());
}
