mod common;

use common::{ERROR_PAGE, Fixture, column, names, setup};
use restree::specialized::{Accessibility, Role, Triggers};
use restree::{Element, Method, RestreeError};
use serde_json::json;

const PROJECT: &str = "/data/projects/P1";
const SUBJECT: &str = "/data/projects/P1/subjects/S1";
const EXPERIMENT: &str = "/data/projects/P1/subjects/S1/experiments/E1";
const SCAN: &str = "/data/projects/P1/subjects/S1/experiments/E1/scans/1";

const SCAN_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xnat:MRScan xmlns:xnat="http://nrg.wustl.edu/xnat" ID="1" type="T1">
  <xnat:parameters>
    <xnat:addParam name="TE">2.98</xnat:addParam>
    <xnat:addParam name="TR">2300</xnat:addParam>
    <xnat:addParam name="coil's mode">array</xnat:addParam>
  </xnat:parameters>
</xnat:MRScan>"#;

fn project(fixture: &Fixture) -> Element {
    fixture.intf.element(PROJECT)
}

fn script_users(fixture: &Fixture) {
    fixture.transport.respond_table(
        &format!("{PROJECT}/users"),
        json!([
            {"login": "alice", "displayname": "Owners"},
            {"login": "bob", "displayname": "Members"},
            {"login": "carol", "displayname": "Collaborators"},
            {"login": "dave", "displayname": "Members"}
        ]),
    );
}

#[test]
fn project_codes_and_accessibility() {
    let fixture = setup();
    let transport = &fixture.transport;
    transport.respond(Method::Get, &format!("{PROJECT}/prearchive_code"), "4\n");
    transport.respond(Method::Get, &format!("{PROJECT}/quarantine_code"), "0");
    transport.respond(Method::Get, &format!("{PROJECT}/accessibility"), "private");
    transport.respond(Method::Put, &format!("{PROJECT}/prearchive_code/0"), "");
    transport.respond(Method::Put, &format!("{PROJECT}/accessibility/public"), "");

    let project = project(&fixture);
    assert_eq!(project.prearchive_code().unwrap(), 4);
    assert_eq!(project.quarantine_code().unwrap(), 0);
    assert_eq!(project.accessibility().unwrap(), Accessibility::Private);
    project.set_prearchive_code(0).unwrap();
    project.set_accessibility(Accessibility::Public).unwrap();
    assert_eq!(
        transport.uris(Method::Put),
        vec![
            "/data/projects/P1/prearchive_code/0",
            "/data/projects/P1/accessibility/public"
        ]
    );
}

#[test]
fn malformed_codes_are_parse_errors() {
    let fixture = setup();
    fixture
        .transport
        .respond(Method::Get, &format!("{PROJECT}/prearchive_code"), "unknown");
    assert!(matches!(project(&fixture).prearchive_code(), Err(RestreeError::Parse { .. })));
    assert!(matches!("secret".parse::<Accessibility>(), Err(RestreeError::Data(_))));
}

#[test]
fn subfolders_go_under_the_current_archive() {
    let fixture = setup();
    fixture
        .transport
        .respond(Method::Get, &format!("{PROJECT}/current_arc"), "arc001");
    fixture
        .transport
        .respond(Method::Put, &format!("{PROJECT}/current_arc/arc001/imports"), "");
    let project = project(&fixture);
    assert_eq!(project.current_arc().unwrap(), "arc001");
    project.set_subfolder_in_current_arc("imports").unwrap();
    assert_eq!(
        fixture.transport.uris(Method::Put),
        vec!["/data/projects/P1/current_arc/arc001/imports"]
    );
}

#[test]
fn project_operations_need_a_project() {
    let fixture = setup();
    let subject = fixture.intf.element(SUBJECT);
    assert!(matches!(subject.prearchive_code(), Err(RestreeError::Programming(_))));
    assert!(matches!(subject.users(), Err(RestreeError::Programming(_))));
    assert!(matches!(subject.last_modified(), Err(RestreeError::Programming(_))));
    assert!(fixture.transport.requests().is_empty());
}

#[test]
fn users_by_role() {
    let fixture = setup();
    script_users(&fixture);
    let project = project(&fixture);

    assert_eq!(project.users().unwrap(), vec!["alice", "bob", "carol", "dave"]);
    assert_eq!(project.owners().unwrap(), vec!["alice"]);
    assert_eq!(project.members().unwrap(), vec!["bob", "dave"]);
    assert_eq!(project.collaborators().unwrap(), vec!["carol"]);
    assert_eq!(project.user_role("bob").unwrap(), Some(Role::Member));
    assert_eq!(project.user_role("nobody").unwrap(), None);
    assert_eq!(
        fixture.transport.uris(Method::Get)[0],
        "/data/projects/P1/users?format=json"
    );
    assert_eq!("Collaborators".parse::<Role>().unwrap(), Role::Collaborator);
}

#[test]
fn adding_and_removing_users() {
    let fixture = setup();
    script_users(&fixture);
    fixture
        .transport
        .respond(Method::Put, &format!("{PROJECT}/users/Collaborators/erin"), "");
    fixture
        .transport
        .respond(Method::Delete, &format!("{PROJECT}/users/Members/bob"), "");
    let project = project(&fixture);

    project.add_user("erin", Role::Collaborator).unwrap();
    project.remove_user("bob").unwrap();
    assert!(matches!(project.remove_user("nobody"), Err(RestreeError::Data(_))));
    assert_eq!(
        fixture.transport.uris(Method::Delete),
        vec!["/data/projects/P1/users/Members/bob"]
    );
}

#[test]
fn project_experiments_use_the_project_identifier() {
    let fixture = setup();
    fixture.transport.respond_table(
        "/data/projects",
        json!([{"ID": "P1", "secondary_ID": "pilot"}]),
    );
    fixture.transport.respond_table(
        "/data/projects/P1/experiments",
        json!([
            {"ID": "E1", "label": "baseline"},
            {"ID": "X2", "label": "followup"}
        ]),
    );

    let by_label = fixture.intf.element("/data/projects/pilot");
    let experiments = by_label.project_experiments("E*").unwrap();
    assert_eq!(names(&experiments.try_collect().unwrap()), vec!["E1"]);

    let experiment = project(&fixture).project_experiment("baseline").unwrap();
    assert_eq!(experiment.uri(), "/data/projects/P1/experiments/E1");
    let unknown = project(&fixture).project_experiment("E9").unwrap();
    assert_eq!(unknown.uri(), "/data/projects/P1/experiments/E9");
}

#[test]
fn last_modified_per_subject() {
    let fixture = setup();
    fixture.transport.respond_table(
        &format!("{PROJECT}/subjects"),
        json!([
            {"ID": "S1", "last_modified": "2024-03-01 10:00:00.0"},
            {"ID": "S2", "last_modified": "2024-04-12 08:30:00.0"}
        ]),
    );
    let modified = project(&fixture).last_modified().unwrap();
    assert_eq!(modified.len(), 2);
    assert_eq!(modified["S2"], "2024-04-12 08:30:00.0");
    assert_eq!(
        fixture.transport.uris(Method::Get),
        vec!["/data/projects/P1/subjects?format=json&columns=ID,last_modified"]
    );
}

#[test]
fn sharing_elements() {
    let fixture = setup();
    fixture
        .transport
        .respond_table(&format!("{SUBJECT}/projects"), column("ID", &["P1", "P2"]));
    fixture
        .transport
        .respond(Method::Put, &format!("{SUBJECT}/projects/P3"), "");
    fixture
        .transport
        .respond(Method::Delete, &format!("{SUBJECT}/projects/P2"), ERROR_PAGE);

    let subject = fixture.intf.element(SUBJECT);
    let shares = subject.shares("*").unwrap().try_collect().unwrap();
    assert_eq!(names(&shares), vec!["P1", "P2"]);
    subject.share("P3").unwrap();
    assert!(matches!(subject.unshare("P2"), Err(RestreeError::Data(_))));
    assert!(matches!(project(&fixture).share("P3"), Err(RestreeError::Programming(_))));
}

#[test]
fn collections_filter_and_share_their_members() {
    let fixture = setup();
    let subjects = "/data/projects/P1/subjects";
    fixture.transport.respond_table(subjects, column("ID", &["S1", "S2"]));
    fixture
        .transport
        .respond_table(&format!("{subjects}/S1/projects"), column("ID", &["P1", "P2"]));
    fixture
        .transport
        .respond_table(&format!("{subjects}/S2/projects"), column("ID", &["P1"]));
    fixture.transport.respond(Method::Put, &format!("{subjects}/S1/projects/P3"), "");
    fixture.transport.respond(Method::Put, &format!("{subjects}/S2/projects/P3"), "");

    let collection = fixture.intf.select(subjects).unwrap().into_collection().unwrap();
    let shared = collection.sharing(&["P1", "P2"]).unwrap();
    assert_eq!(names(&shared.try_collect().unwrap()), vec!["S1"]);
    assert_eq!(collection.sharing(&["P1"]).unwrap().try_collect().unwrap().len(), 2);

    collection.share("P3").unwrap();
    assert_eq!(fixture.transport.uris(Method::Put).len(), 2);

    let projects = fixture.intf.collection("projects").unwrap();
    assert!(matches!(projects.sharing(&["P1"]), Err(RestreeError::Programming(_))));
}

#[test]
fn triggers_are_sent_in_one_call() {
    let fixture = setup();
    fixture.transport.respond(Method::Put, EXPERIMENT, "");
    let experiment = fixture.intf.element(EXPERIMENT);

    experiment.trigger(Triggers::default()).unwrap();
    experiment.fix_scan_types().unwrap();
    experiment
        .trigger(Triggers { pipelines: false, fix_types: false, scan_headers: false })
        .unwrap();
    assert_eq!(
        fixture.transport.uris(Method::Put),
        vec![
            format!("{EXPERIMENT}?triggerPipelines=true&fixScanTypes=true&pullDataFromHeaders=true"),
            format!("{EXPERIMENT}?fixScanTypes=true"),
        ]
    );
    assert!(matches!(
        fixture.intf.element(SUBJECT).trigger_pipelines(),
        Err(RestreeError::Programming(_))
    ));
}

#[test]
fn scan_parameters_come_from_the_document() {
    let fixture = setup();
    fixture
        .transport
        .respond(Method::Get, &format!("{SCAN}?format=xml"), SCAN_DOCUMENT);
    let scan = fixture.intf.element(SCAN);

    assert_eq!(scan.params().unwrap(), vec!["TE", "TR", "coil's mode"]);
    assert_eq!(scan.get_params().unwrap(), vec!["2.98", "2300", "array"]);
    assert_eq!(scan.get_param("TR").unwrap().as_deref(), Some("2300"));
    assert_eq!(scan.get_param("TI").unwrap(), None);
    assert_eq!(scan.get_param("coil's mode").unwrap().as_deref(), Some("array"));
    assert!(matches!(scan.get_param(r#"a'b"c"#), Err(RestreeError::Data(_))));
    assert!(matches!(
        fixture.intf.element(EXPERIMENT).params(),
        Err(RestreeError::Programming(_))
    ));
}
