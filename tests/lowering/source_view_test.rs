// tests/lowering/source_view_test.rs
use quarry::compile::{compile_query, CompileOptions, QueryRef};
use quarry::config::Settings;
use quarry::dsl::ast::{
    BinaryOp, Document, Expr, FieldDecl, JoinDecl, JoinKind, PipeElement, QueryExpr, QueryItem,
    QueryStatement, RenameDecl, SourceExpr, SourceProperty, SourceStatement, StageBlock,
    StageProperty, Statement, ViewDecl,
};
use quarry::dsl::{DiagnosticKind, Span, Spanned};
use quarry::lowering::{build_model, SchemaCatalog};
use quarry::model::{AtomicType, Correlation, FieldDef, ModelDef, Stage, TableSchema};
use quarry::sql::Dialect;

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.add_table(
        "flights",
        TableSchema::new([
            ("id", AtomicType::Number),
            ("carrier", AtomicType::String),
            ("distance", AtomicType::Number),
            ("dep_time", AtomicType::Timestamp),
        ]),
    );
    catalog.add_table(
        "carriers",
        TableSchema::new([("code", AtomicType::String), ("nickname", AtomicType::String)]),
    );
    catalog
}

fn name(value: &str) -> Spanned<String> {
    Spanned::new(value.to_string(), Span::default())
}

fn source(source_name: &str, expr: SourceExpr) -> Statement {
    Statement::Source(SourceStatement {
        name: name(source_name),
        source: expr,
        span: Span::default(),
    })
}

fn build(statements: Vec<Statement>) -> ModelDef {
    build_model(
        "file:///views.model",
        &Document { statements },
        &catalog(),
        &Settings::default(),
    )
}

fn flights(body: Vec<SourceProperty>) -> Statement {
    source("flights", SourceExpr::table(None, "flights").refine(body))
}

// ============================================================================
// accept / except / rename
// ============================================================================

#[test]
fn test_accept_shares_definitions_with_the_base() {
    let model = build(vec![
        flights(vec![SourceProperty::Dimension {
            fields: vec![FieldDecl::new("long_haul", Expr::field("distance").gt(Expr::number(1000)))],
        }]),
        source(
            "narrow",
            SourceExpr::named("flights").refine(vec![SourceProperty::Accept {
                fields: vec![name("carrier"), name("long_haul")],
            }]),
        ),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    let base = model.source("flights").unwrap();
    let narrow = model.source("narrow").unwrap();
    assert_eq!(narrow.fields.names().collect::<Vec<_>>(), vec!["carrier", "long_haul"]);
    assert!(narrow.fields.shares(&base.fields, "long_haul", "long_haul"));
}

#[test]
fn test_except_of_unknown_field_fails() {
    let model = build(vec![
        flights(vec![]),
        source(
            "narrow",
            SourceExpr::named("flights").refine(vec![SourceProperty::Except {
                fields: vec![name("nope")],
            }]),
        ),
    ]);
    assert!(model.is_invalid("narrow"));
    assert_eq!(model.diagnostics[0].message, "'nope' is not defined");
}

#[test]
fn test_rename_keeps_the_same_definition() {
    let model = build(vec![
        flights(vec![]),
        source(
            "renamed",
            SourceExpr::named("flights").refine(vec![SourceProperty::Rename {
                renames: vec![RenameDecl {
                    new_name: name("miles"),
                    old_name: name("distance"),
                }],
            }]),
        ),
    ]);
    let base = model.source("flights").unwrap();
    let renamed = model.source("renamed").unwrap();
    assert!(renamed.field("distance").is_none());
    assert!(renamed.fields.shares(&base.fields, "miles", "distance"));
}

#[test]
fn test_rename_onto_existing_name_is_a_duplicate() {
    let model = build(vec![flights(vec![SourceProperty::Rename {
        renames: vec![RenameDecl {
            new_name: name("carrier"),
            old_name: name("distance"),
        }],
    }])]);
    assert!(model.is_invalid("flights"));
    assert_eq!(model.diagnostics[0].message, "cannot redefine 'carrier'");
}

// Inherited measures keep reading the fields they were written against, even
// once the view hides or renames them.

fn over_view(view: Vec<SourceProperty>, stage: Vec<StageProperty>) -> String {
    let model = build(vec![
        flights(vec![SourceProperty::Measure {
            fields: vec![FieldDecl::new("total_distance", Expr::sum(Expr::field("distance")))],
        }]),
        source("narrow", SourceExpr::named("flights").refine(view)),
        Statement::Query(QueryStatement {
            name: Some(name("q")),
            query: QueryExpr::from_source(SourceExpr::named("narrow"), vec![PipeElement::stage(stage)]),
            span: Span::default(),
        }),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    compile_query(
        &model,
        &QueryRef::named("q"),
        &CompileOptions::default().with_dialect(Dialect::Postgres),
    )
    .unwrap()
    .sql
}

fn total_by_carrier() -> Vec<StageProperty> {
    vec![
        StageProperty::GroupBy {
            fields: vec![QueryItem::reference("carrier")],
        },
        StageProperty::Aggregate {
            fields: vec![QueryItem::reference("total_distance")],
        },
    ]
}

#[test]
fn test_measure_reads_a_renamed_field() {
    let sql = over_view(
        vec![SourceProperty::Rename {
            renames: vec![RenameDecl {
                new_name: name("miles"),
                old_name: name("distance"),
            }],
        }],
        total_by_carrier(),
    );
    assert!(sql.contains(r#"COALESCE(SUM("base"."distance"), 0) AS "total_distance""#), "{sql}");
}

#[test]
fn test_measure_reads_an_excepted_field() {
    let sql = over_view(
        vec![SourceProperty::Except {
            fields: vec![name("distance")],
        }],
        total_by_carrier(),
    );
    assert!(sql.contains(r#"COALESCE(SUM("base"."distance"), 0) AS "total_distance""#), "{sql}");
}

#[test]
fn test_measure_reads_a_field_left_out_of_accept() {
    let sql = over_view(
        vec![SourceProperty::Accept {
            fields: vec![name("carrier"), name("total_distance")],
        }],
        total_by_carrier(),
    );
    assert!(sql.contains(r#"COALESCE(SUM("base"."distance"), 0) AS "total_distance""#), "{sql}");
}

#[test]
fn test_hidden_field_is_not_visible_to_queries() {
    let model = build(vec![
        flights(vec![]),
        source(
            "narrow",
            SourceExpr::named("flights").refine(vec![SourceProperty::Except {
                fields: vec![name("distance")],
            }]),
        ),
        Statement::Query(QueryStatement {
            name: Some(name("q")),
            query: QueryExpr::from_source(
                SourceExpr::named("narrow"),
                vec![PipeElement::stage(vec![StageProperty::GroupBy {
                    fields: vec![QueryItem::reference("distance")],
                }])],
            ),
            span: Span::default(),
        }),
    ]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::NameResolution);
}

#[test]
fn test_hidden_name_cannot_be_redefined() {
    let model = build(vec![
        flights(vec![]),
        source(
            "narrow",
            SourceExpr::named("flights").refine(vec![
                SourceProperty::Except {
                    fields: vec![name("distance")],
                },
                SourceProperty::Dimension {
                    fields: vec![FieldDecl::new("distance", Expr::number(1))],
                },
            ]),
        ),
    ]);
    assert!(model.is_invalid("narrow"));
    assert_eq!(model.diagnostics[0].message, "cannot redefine 'distance'");
}

// ============================================================================
// Declarations
// ============================================================================

#[test]
fn test_fields_may_reference_later_fields() {
    let model = build(vec![flights(vec![
        SourceProperty::Dimension {
            fields: vec![FieldDecl::new(
                "km",
                Expr::binary(BinaryOp::Mul, Expr::field("miles"), Expr::number(1.609)),
            )],
        },
        SourceProperty::Dimension {
            fields: vec![FieldDecl::new("miles", Expr::field("distance"))],
        },
    ])]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    assert!(model.source("flights").unwrap().field("km").is_some());
}

#[test]
fn test_circular_fields_are_structural_errors() {
    let model = build(vec![flights(vec![SourceProperty::Dimension {
        fields: vec![
            FieldDecl::new("a", Expr::field("b")),
            FieldDecl::new("b", Expr::field("a")),
        ],
    }])]);
    assert!(model.is_invalid("flights"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Structural);
    assert!(model.diagnostics[0].message.starts_with("circular definition"));
}

#[test]
fn test_declare_infers_field_kind() {
    let model = build(vec![flights(vec![SourceProperty::Declare {
        fields: vec![
            FieldDecl::new("total_distance", Expr::sum(Expr::field("distance"))),
            FieldDecl::new("is_long", Expr::field("distance").gt(Expr::number(500))),
        ],
    }])]);
    let flights = model.source("flights").unwrap();
    assert!(matches!(
        flights.field("total_distance").unwrap().as_ref(),
        FieldDef::Measure(_)
    ));
    assert!(matches!(
        flights.field("is_long").unwrap().as_ref(),
        FieldDef::Dimension(_)
    ));
}

#[test]
fn test_source_filters_are_recorded() {
    let model = build(vec![flights(vec![SourceProperty::Where {
        filters: vec![Expr::field("distance").gt(Expr::number(0))],
    }])]);
    assert_eq!(model.source("flights").unwrap().filters.len(), 1);
}

#[test]
fn test_source_filter_must_be_boolean() {
    let model = build(vec![flights(vec![SourceProperty::Where {
        filters: vec![Expr::field("carrier")],
    }])]);
    assert!(model.is_invalid("flights"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Type);
}

// ============================================================================
// Joins
// ============================================================================

fn carriers() -> Statement {
    source(
        "carriers",
        SourceExpr::table(None, "carriers").refine(vec![SourceProperty::PrimaryKey {
            field: name("code"),
        }]),
    )
}

#[test]
fn test_join_without_source_names_a_source() {
    let mut join = JoinDecl::new("carriers", JoinKind::One, SourceExpr::named("carriers"))
        .with(Expr::field("carrier"));
    join.source = None;
    let model = build(vec![
        carriers(),
        flights(vec![SourceProperty::Join { joins: vec![join] }]),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    let flights = model.source("flights").unwrap();
    let join = flights.join("carriers").unwrap();
    assert_eq!(join.source.primary_key.as_deref(), Some("code"));
    assert!(matches!(join.correlation, Correlation::With(_)));
}

#[test]
fn test_on_condition_reads_both_sides() {
    let model = build(vec![
        carriers(),
        flights(vec![SourceProperty::Join {
            joins: vec![JoinDecl::new("c", JoinKind::One, SourceExpr::named("carriers"))
                .on(Expr::field("carrier").eq(Expr::field("c.code")))],
        }]),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    assert!(matches!(
        model.source("flights").unwrap().join("c").unwrap().correlation,
        Correlation::On(_)
    ));
}

#[test]
fn test_join_name_may_not_shadow_a_column() {
    let model = build(vec![
        carriers(),
        flights(vec![SourceProperty::Join {
            joins: vec![JoinDecl::new("carrier", JoinKind::One, SourceExpr::named("carriers"))
                .with(Expr::field("carrier"))],
        }]),
    ]);
    assert!(model.is_invalid("flights"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::NameResolution);
}

fn carrier_join(join_name: &str) -> JoinDecl {
    JoinDecl::new(join_name, JoinKind::One, SourceExpr::named("carriers")).with(Expr::field("carrier"))
}

#[test]
fn test_join_declared_twice_is_ambiguous() {
    let model = build(vec![
        carriers(),
        flights(vec![SourceProperty::Join {
            joins: vec![carrier_join("c"), carrier_join("c")],
        }]),
    ]);
    assert!(model.is_invalid("flights"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::Structural);
    assert_eq!(model.diagnostics[0].message, "ambiguous join path 'c'");
}

#[test]
fn test_join_shadowing_an_inherited_join_is_ambiguous() {
    let model = build(vec![
        carriers(),
        flights(vec![SourceProperty::Join {
            joins: vec![carrier_join("c")],
        }]),
        source(
            "more",
            SourceExpr::named("flights").refine(vec![SourceProperty::Join {
                joins: vec![carrier_join("c")],
            }]),
        ),
    ]);
    assert!(!model.is_invalid("flights"));
    assert!(model.is_invalid("more"));
    assert_eq!(model.diagnostics[0].message, "ambiguous join path 'c'");
}

// ============================================================================
// Views
// ============================================================================

fn with_view() -> Statement {
    flights(vec![
        SourceProperty::Measure {
            fields: vec![FieldDecl::new("flight_count", Expr::count())],
        },
        SourceProperty::View {
            views: vec![ViewDecl {
                name: name("by_carrier"),
                pipeline: vec![PipeElement::stage(vec![
                    StageProperty::GroupBy {
                        fields: vec![QueryItem::reference("carrier")],
                    },
                    StageProperty::Aggregate {
                        fields: vec![QueryItem::reference("flight_count")],
                    },
                ])],
                span: Span::default(),
            }],
        },
    ])
}

fn run(pipeline: Vec<PipeElement>) -> Statement {
    Statement::Query(QueryStatement {
        name: Some(name("q")),
        query: QueryExpr::from_source(SourceExpr::named("flights"), pipeline),
        span: Span::default(),
    })
}

#[test]
fn test_view_is_usable_as_a_pipeline_element() {
    let model = build(vec![with_view(), run(vec![PipeElement::view("by_carrier")])]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    let query = model.query("q").unwrap();
    let names: Vec<_> = query.output_schema().iter().map(|f| f.name.clone()).collect();
    assert_eq!(names, vec!["carrier", "flight_count"]);
}

#[test]
fn test_view_refinement_extends_the_stage() {
    let model = build(vec![
        with_view(),
        run(vec![PipeElement::View {
            name: name("by_carrier"),
            refinement: Some(StageBlock::new(vec![StageProperty::Aggregate {
                fields: vec![QueryItem::define(
                    "total_distance",
                    Expr::sum(Expr::field("distance")),
                )],
            }])),
        }]),
    ]);
    assert!(model.diagnostics.is_empty(), "{:?}", model.diagnostics);
    let Stage::Reduce(stage) = &model.query("q").unwrap().pipeline.stages[0] else {
        panic!("expected a reduce stage");
    };
    assert_eq!(stage.fields.len(), 3);
}

#[test]
fn test_unknown_view_is_a_name_error() {
    let model = build(vec![with_view(), run(vec![PipeElement::view("by_origin")])]);
    assert!(model.is_invalid("q"));
    assert_eq!(model.diagnostics[0].kind, DiagnosticKind::NameResolution);
}
