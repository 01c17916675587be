use strata_core::error::StrataError;
use strata_core::prelude::*;

fn reference(name: &str, reference: ReferenceDescriptor) -> PropertyDescriptor {
    PropertyDescriptor::simple(name, "string").references(reference)
}

fn cycle_chain(schema: &Schema, root: &str) -> String {
    match CycleDetector::new(schema).check_type(root) {
        Err(StrataError::CrossReferenceCycleDetected { chain }) => chain,
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn two_class_cycle_is_detected_with_full_chain() {
    let schema = Schema::new()
        .with_type(TypeDescriptor::new("A").property(reference("b", ReferenceDescriptor::to("B"))))
        .with_type(TypeDescriptor::new("B").property(reference("a", ReferenceDescriptor::to("A"))));

    assert_eq!(
        cycle_chain(&schema, "A"),
        "A@class[name=A]/default -> B@class[name=B]/default -> A@class[name=A]/default"
    );
}

#[test]
fn chain_with_distinct_paths_passes() {
    let schema = Schema::new()
        .with_type(TypeDescriptor::new("A").property(reference("b", ReferenceDescriptor::to("B"))))
        .with_type(TypeDescriptor::new("B").property(reference("c", ReferenceDescriptor::to("C"))))
        .with_type(TypeDescriptor::new("C"));

    let detector = CycleDetector::new(&schema);
    detector.check_type("A").unwrap();
    detector.check_all().unwrap();
}

#[test]
fn diamond_is_not_a_cycle() {
    let schema = Schema::new()
        .with_type(
            TypeDescriptor::new("A")
                .property(reference("b", ReferenceDescriptor::to("B")))
                .property(reference("c", ReferenceDescriptor::to("C"))),
        )
        .with_type(TypeDescriptor::new("B").property(reference("d", ReferenceDescriptor::to("D"))))
        .with_type(TypeDescriptor::new("C").property(reference("d", ReferenceDescriptor::to("D"))))
        .with_type(TypeDescriptor::new("D"));

    CycleDetector::new(&schema).check_type("A").unwrap();
}

#[test]
fn distinct_instances_do_not_collide() {
    let schema = Schema::new()
        .with_type(
            TypeDescriptor::new("App")
                .property(reference("main", ReferenceDescriptor::to("Db").instance("main")))
                .property(reference("replica", ReferenceDescriptor::to("Db").instance("replica"))),
        )
        .with_type(TypeDescriptor::new("Db").property(reference("audit", ReferenceDescriptor::to("Audit"))))
        .with_type(TypeDescriptor::new("Audit"));

    let detector = CycleDetector::new(&schema);
    detector.check_type("App").unwrap();
    detector
        .check(
            "Db",
            &"class[name=Db]/default/instance[name=main]".parse().unwrap(),
        )
        .unwrap();
}

#[test]
fn explicit_reference_path_closes_a_loop() {
    let global: ScopePath = "class[name=App]/default/global".parse().unwrap();
    let schema = Schema::new()
        .with_type(TypeDescriptor::new("App").property(reference("db", ReferenceDescriptor::to("Db"))))
        .with_type(TypeDescriptor::new("Db").property(reference(
            "owner",
            ReferenceDescriptor::to("App").at(global.clone()),
        )));

    // Rooted at the path Db points back to, App reaches itself.
    let err = CycleDetector::new(&schema).check("App", &global).unwrap_err();
    let StrataError::CrossReferenceCycleDetected { chain } = err else {
        panic!("expected a cycle, got {err:?}");
    };
    assert_eq!(
        chain,
        "App@class[name=App]/default/global -> Db@class[name=Db]/default -> App@class[name=App]/default/global"
    );
}

#[test]
fn references_inside_embedded_collections_are_edges() {
    let schema = Schema::new()
        .with_type(
            TypeDescriptor::new("App")
                .property(PropertyDescriptor::map("endpoints", ItemKind::Complex, "Endpoint")),
        )
        .with_type(
            TypeDescriptor::new("Endpoint")
                .property(reference("backend", ReferenceDescriptor::to("Backend"))),
        )
        .with_type(
            TypeDescriptor::new("Backend")
                .property(reference("app", ReferenceDescriptor::to("App"))),
        );

    let chain = cycle_chain(&schema, "App");
    assert!(chain.starts_with("App@"));
    assert!(chain.contains("Backend@class[name=Backend]/default"));
}

#[test]
fn polymorphic_properties_are_not_inspected() {
    let schema = Schema::new()
        .with_type(
            TypeDescriptor::new("App")
                .property(PropertyDescriptor::complex("handler", "Handler").polymorphic()),
        )
        .with_type(
            TypeDescriptor::new("Handler")
                .property(reference("app", ReferenceDescriptor::to("App"))),
        );

    CycleDetector::new(&schema).check_type("App").unwrap();
}
