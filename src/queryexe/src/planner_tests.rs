// These tests compile and run statements end to end against the in-memory
// catalog and shard store, over one or more nodes.

#[cfg(test)]
mod tests {
    use crate::context::{CancelToken, ExecEnv, ExecutionContext};
    use crate::opiterator::{drain, Filter};
    use crate::plan::{PlanExpr, PlanOperator};
    use crate::query::access::DenyList;
    use crate::query::{ExecutionPlanner, QueryResult};
    use common::ast::*;
    use common::config::Config;
    use common::testutil::*;
    use common::{AccessType, CatalogError, DataType, EngineError, Row, Value, ID_COLUMN};
    use rand::Rng;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use temp_testdir::TempDir;

    const DB: &str = "db";

    struct TestDb {
        planner: ExecutionPlanner,
        ctx: ExecutionContext,
        _dir: TempDir,
    }

    impl TestDb {
        fn run(&self, stmt: Statement) -> Result<QueryResult, EngineError> {
            self.planner.run(&self.ctx, &stmt)
        }

        fn rows(&self, stmt: Statement) -> Vec<Row> {
            self.run(stmt).unwrap().into_rows()
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.spill_dir = dir.to_path_buf();
        config.shard_width = 4;
        config
    }

    fn setup_with(nodes: u32, config: impl FnOnce(&mut Config), gate: Option<Arc<DenyList>>) -> TestDb {
        init();
        let dir = TempDir::new(gen_random_dir(), true);
        let mut cfg = test_config(&dir);
        config(&mut cfg);
        let mut env = ExecEnv::in_memory(nodes, cfg);
        if let Some(gate) = gate {
            env = env.with_gate(gate);
        }
        let planner = ExecutionPlanner::new(Arc::new(env));
        let ctx = planner.context(DB);
        let db = TestDb {
            planner,
            ctx,
            _dir: dir,
        };
        db.run(Statement::CreateDatabase {
            name: DB.to_string(),
            if_not_exists: false,
            options: BTreeMap::new(),
        })
        .unwrap();
        db.run(create_table("t")).unwrap();
        db
    }

    fn setup(nodes: u32) -> TestDb {
        setup_with(nodes, |_| {}, None)
    }

    fn column(name: &str, dtype: DataType, nullable: bool) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            dtype,
            nullable,
        }
    }

    fn create_table(name: &str) -> Statement {
        Statement::CreateTable {
            name: name.to_string(),
            if_not_exists: false,
            columns: vec![
                column(ID_COLUMN, DataType::Id, false),
                column("a", DataType::Int, true),
                column("b", DataType::String, true),
            ],
            description: Some(format!("{} table", name)),
        }
    }

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    fn insert(rows: Vec<(i64, Value, Value)>) -> Statement {
        Statement::Insert {
            table: "t".to_string(),
            columns: vec![ID_COLUMN.to_string(), "a".to_string(), "b".to_string()],
            rows: rows
                .into_iter()
                .map(|(id, a, b)| {
                    vec![
                        Expr::literal(Value::Int(id)),
                        Expr::literal(a),
                        Expr::literal(b),
                    ]
                })
                .collect(),
        }
    }

    fn item(name: &str) -> SelectItem {
        SelectItem::Expr {
            expr: Expr::column(name),
            alias: None,
        }
    }

    fn select(projection: Vec<SelectItem>) -> Select {
        Select {
            projection,
            from: Some(TableRef::new("t")),
            ..Select::default()
        }
    }

    fn ids(rows: &[Row]) -> Vec<u64> {
        rows.iter()
            .map(|r| r.get(0).and_then(|v| v.as_id()).unwrap())
            .collect()
    }

    /// ids 1..=n, `a = id % 3`, `b` cycling through three strings.
    fn fill(db: &TestDb, n: i64) {
        let names = ["x", "y", "z"];
        let rows = (1..=n)
            .map(|id| (id, Value::Int(id % 3), string(names[(id % 3) as usize])))
            .collect();
        db.run(insert(rows)).unwrap();
    }

    /// Runs the statement and checks every row against the root schema.
    fn run_conforming(db: &TestDb, stmt: Statement) -> Vec<Row> {
        let plan = db.planner.compile_plan(&db.ctx, &stmt).unwrap();
        let schema = plan.schema();
        let rows = db.planner.execute(&db.ctx, &plan).unwrap().into_rows();
        for row in &rows {
            assert_eq!(Ok(()), schema.check_row(row), "{:?} in {}", row, plan.name());
        }
        rows
    }

    fn add_column(name: &str, dtype: DataType, nullable: bool) -> Statement {
        Statement::AlterTable {
            name: "t".to_string(),
            operation: AlterTableOperation::AddColumn(column(name, dtype, nullable)),
        }
    }

    #[test]
    fn test_create_insert_select() {
        let db = setup(1);
        fill(&db, 10);
        let result = db.run(Statement::Select(select(vec![SelectItem::Wildcard(None)]))).unwrap();
        assert_eq!(10, result.len());
        let names: Vec<&str> = result.schema().columns().map(|c| c.name()).collect();
        assert_eq!(vec![ID_COLUMN, "a", "b"], names);
        assert_eq!(
            &Row::new(vec![Value::Id(4), Value::Int(1), string("y")]),
            &result.rows()[3]
        );
        assert!(result.warnings().is_empty());
    }

    #[test]
    fn test_distinct_first_occurrence() {
        let db = setup(1);
        db.run(insert(vec![
            (1, Value::Int(1), string("a")),
            (2, Value::Int(2), string("b")),
            (3, Value::Int(1), string("a")),
            (4, Value::Int(3), string("c")),
            (5, Value::Int(2), string("b")),
        ]))
        .unwrap();
        let mut s = select(vec![item("a"), item("b")]);
        s.distinct = true;
        let rows = db.rows(Statement::Select(s));
        let expected = vec![
            Row::new(vec![Value::Int(1), string("a")]),
            Row::new(vec![Value::Int(2), string("b")]),
            Row::new(vec![Value::Int(3), string("c")]),
        ];
        assert_eq!(expected, rows);
    }

    #[test]
    fn test_results_in_node_order() {
        // shards 0 and 2 live on node 0, shard 1 on node 1
        let db = setup(2);
        fill(&db, 10);
        let rows = db.rows(Statement::Select(select(vec![item(ID_COLUMN)])));
        assert_eq!(vec![1, 2, 3, 8, 9, 10, 4, 5, 6, 7], ids(&rows));

        let mut s = select(vec![item(ID_COLUMN)]);
        s.order_by = vec![OrderByItem {
            expr: Expr::column(ID_COLUMN),
            descending: true,
        }];
        s.limit = Some(Limit {
            limit: 3,
            offset: 1,
        });
        let rows = db.rows(Statement::Select(s));
        assert_eq!(vec![9, 8, 7], ids(&rows));
    }

    #[test]
    fn test_multi_node_distinct() {
        let db = setup(3);
        fill(&db, 40);
        let all = db.rows(Statement::Select(select(vec![item("a"), item("b")])));
        assert_eq!(40, all.len());
        let mut s = select(vec![item("a"), item("b")]);
        s.distinct = true;
        let rows = db.rows(Statement::Select(s.clone()));
        assert_eq!(3, rows.len());
        assert_eq!(first_occurrences(&all), rows);
        // idempotent
        assert_eq!(rows, db.rows(Statement::Select(s)));
    }

    #[test]
    fn test_random_distinct_matches_first_occurrences() {
        let mut rng = rand::thread_rng();
        let db = setup(4);
        let rows = (1..=200)
            .map(|id| {
                let a = rng.gen_range(0..6);
                let b = if rng.gen_bool(0.2) {
                    Value::Null
                } else {
                    string(&gen_rand_string(1))
                };
                (id, Value::Int(a), b)
            })
            .collect();
        db.run(insert(rows)).unwrap();
        let all = db.rows(Statement::Select(select(vec![item("a"), item("b")])));
        let mut s = select(vec![item("a"), item("b")]);
        s.distinct = true;
        assert_eq!(first_occurrences(&all), db.rows(Statement::Select(s)));
    }

    #[test]
    fn test_filter_and_expressions() {
        let db = setup(2);
        fill(&db, 12);
        let mut s = select(vec![
            item(ID_COLUMN),
            SelectItem::Expr {
                expr: Expr::binary(Expr::column("a"), BinaryOp::Multiply, Expr::literal(Value::Int(10))),
                alias: Some("ten_a".to_string()),
            },
        ]);
        s.selection = Some(Expr::binary(
            Expr::binary(Expr::column("a"), BinaryOp::Eq, Expr::literal(Value::Int(1))),
            BinaryOp::And,
            Expr::binary(Expr::column(ID_COLUMN), BinaryOp::Lt, Expr::literal(Value::Int(10))),
        ));
        s.order_by = vec![OrderByItem {
            expr: Expr::column(ID_COLUMN),
            descending: false,
        }];
        let result = db.run(Statement::Select(s)).unwrap();
        assert_eq!(vec![1, 4, 7], ids(result.rows()));
        assert_eq!(Some(&Value::Int(10)), result.rows()[0].get(1));
        assert_eq!(Some("ten_a"), result.schema().get_column(1).map(|c| c.name()));
    }

    #[test]
    fn test_select_without_from() {
        let db = setup(1);
        let s = Select {
            projection: vec![SelectItem::Expr {
                expr: Expr::binary(
                    Expr::literal(Value::Int(1)),
                    BinaryOp::Plus,
                    Expr::literal(Value::Int(2)),
                ),
                alias: Some("x".to_string()),
            }],
            ..Select::default()
        };
        let result = db.run(Statement::Select(s)).unwrap();
        assert_eq!(vec![Row::new(vec![Value::Int(3)])], result.rows().to_vec());
        assert_eq!(Some("x"), result.schema().get_column(0).map(|c| c.name()));
    }

    #[test]
    fn test_insert_overwrites_and_clears() {
        let db = setup(1);
        db.run(insert(vec![(1, Value::Int(5), string("a"))])).unwrap();
        db.run(insert(vec![(1, Value::Null, string("b"))])).unwrap();
        let rows = db.rows(Statement::Select(select(vec![SelectItem::Wildcard(None)])));
        assert_eq!(
            vec![Row::new(vec![Value::Id(1), Value::Null, string("b")])],
            rows
        );
    }

    #[test]
    fn test_compiled_plan_shape() {
        let db = setup(2);
        let mut s = select(vec![item("a")]);
        s.distinct = true;
        s.order_by = vec![OrderByItem {
            expr: Expr::column("a"),
            descending: false,
        }];
        s.limit = Some(Limit {
            limit: 2,
            offset: 0,
        });
        let plan = db
            .planner
            .compile_plan(&db.ctx, &Statement::Select(s))
            .unwrap();
        let mut ops = Vec::new();
        let mut node = &plan.plan();
        loop {
            ops.push(node["_op"].as_str().unwrap().to_string());
            match node.get("child") {
                Some(child) => node = child,
                None => break,
            }
        }
        let expected = vec![
            "PlanOpLimit",
            "PlanOpOrderBy",
            "PlanOpDistinct",
            "PlanOpFanOut",
            "PlanOpDistinct",
            "PlanOpProjection",
            "PlanOpTableScan",
        ];
        assert_eq!(expected, ops);

        // every unary operator above the projection keeps its schema
        let projected = plan.schema();
        assert_eq!(1, projected.size());
        let mut op = Arc::new(plan.clone());
        while let Some(child) = op.children().first().cloned() {
            if let PlanOperator::Projection(_) = child.as_ref() {
                assert_eq!(projected, child.schema());
                break;
            }
            assert_eq!(projected, child.schema());
            op = child;
        }
    }

    #[test]
    fn test_rewrite_keeps_original() {
        let db = setup(1);
        fill(&db, 5);
        let mut s = select(vec![item(ID_COLUMN)]);
        s.limit = Some(Limit {
            limit: 2,
            offset: 0,
        });
        let plan = db
            .planner
            .compile_plan(&db.ctx, &Statement::Select(s))
            .unwrap();
        let before = plan.plan();
        let fanout = plan.children()[0].clone();
        let rewritten = plan
            .with_children(vec![fanout.children()[0].clone()])
            .unwrap();
        assert_eq!(before, plan.plan());
        assert_eq!("PlanOpProjection", rewritten.plan()["child"]["_op"]);
        assert_eq!(2, db.planner.execute(&db.ctx, &rewritten).unwrap().len());
        assert_eq!(2, db.planner.execute(&db.ctx, &plan).unwrap().len());
    }

    #[test]
    fn test_rehydrated_plan_runs() {
        let db = setup(2);
        fill(&db, 20);
        let mut s = select(vec![item("b")]);
        s.distinct = true;
        let plan = db
            .planner
            .compile_plan(&db.ctx, &Statement::Select(s))
            .unwrap();
        let bytes = plan.to_bytes().unwrap();
        let back = db.planner.rehydrate_plan_op(&bytes[..]).unwrap();
        assert_eq!(plan, back);
        assert_eq!(
            db.planner.execute(&db.ctx, &plan).unwrap().rows(),
            db.planner.execute(&db.ctx, &back).unwrap().rows()
        );
        assert!(db.planner.rehydrate_plan_op(&bytes[..3]).is_err());
    }

    #[test]
    fn test_unsupported_statements() {
        let db = setup(1);
        let stmts = vec![
            Statement::CreateView {
                name: "v".to_string(),
                query: Box::new(select(vec![item("a")])),
            },
            Statement::CreateFunction {
                name: "f".to_string(),
            },
            Statement::CreateModel {
                name: "m".to_string(),
            },
            Statement::Delete {
                table: "t".to_string(),
                selection: None,
            },
        ];
        for stmt in stmts {
            let expected = format!("cannot plan statement: {}", stmt.shape_name());
            assert_eq!(
                Err(EngineError::InternalError(expected)),
                db.planner.compile_plan(&db.ctx, &stmt)
            );
        }
    }

    #[test]
    fn test_access_denied_blocks_compilation() {
        let gate = Arc::new(DenyList::new());
        let db = setup_with(1, |_| {}, Some(gate.clone()));
        fill(&db, 3);

        gate.deny("t", AccessType::Write);
        let res = db.run(insert(vec![(9, Value::Int(1), string("q"))]));
        assert_eq!(
            Err(EngineError::AccessDenied {
                object: "t".to_string(),
                access: AccessType::Write
            }),
            res.map(|r| r.len())
        );
        assert_eq!(3, db.rows(Statement::Select(select(vec![item("a")]))).len());

        gate.deny("t", AccessType::Read);
        let res = db
            .planner
            .compile_plan(&db.ctx, &Statement::Select(select(vec![item("a")])));
        assert!(matches!(res, Err(EngineError::AccessDenied { .. })));

        gate.deny("t", AccessType::Drop);
        let drop = Statement::DropTable {
            name: "t".to_string(),
            if_exists: false,
        };
        assert!(db.run(drop).is_err());
        assert_eq!(1, db.rows(Statement::ShowTables).len());
    }

    #[test]
    fn test_ddl_and_show() {
        let db = setup(2);
        db.run(create_table("u")).unwrap();
        let tables = db.rows(Statement::ShowTables);
        let names: Vec<Value> = tables.iter().map(|r| r.get(0).cloned().unwrap()).collect();
        assert_eq!(vec![string("t"), string("u")], names);
        assert_eq!(Some(&string("t table")), tables[0].get(2));

        assert_eq!(
            Err(EngineError::Catalog(CatalogError::TableNameExists("u".to_string()))),
            db.run(create_table("u")).map(|r| r.len())
        );
        let mut again = create_table("u");
        if let Statement::CreateTable { if_not_exists, .. } = &mut again {
            *if_not_exists = true;
        }
        assert!(db.run(again).is_ok());

        let add = Statement::AlterTable {
            name: "t".to_string(),
            operation: AlterTableOperation::AddColumn(column("c", DataType::Decimal(2), true)),
        };
        db.run(add).unwrap();
        let columns = db.rows(Statement::ShowColumns {
            table: "t".to_string(),
        });
        assert_eq!(
            Row::new(vec![string("c"), string("decimal(2)"), Value::Bool(true)]),
            columns[3]
        );

        fill(&db, 4);
        let drop_col = Statement::AlterTable {
            name: "t".to_string(),
            operation: AlterTableOperation::DropColumn("b".to_string()),
        };
        db.run(drop_col).unwrap();
        let rows = db.rows(Statement::Select(select(vec![SelectItem::Wildcard(None)])));
        assert_eq!(4, rows.len());
        assert_eq!(3, rows[0].size());

        db.run(Statement::DropTable {
            name: "u".to_string(),
            if_exists: false,
        })
        .unwrap();
        assert_eq!(1, db.rows(Statement::ShowTables).len());
        db.run(Statement::DropTable {
            name: "u".to_string(),
            if_exists: true,
        })
        .unwrap();

        let dbs = db.rows(Statement::ShowDatabases);
        assert_eq!(1, dbs.len());
        assert_eq!(Some(&string(DB)), dbs[0].get(0));

        db.run(Statement::AlterDatabase {
            name: DB.to_string(),
            option: "owner".to_string(),
            value: "me".to_string(),
        })
        .unwrap();
        db.run(Statement::DropDatabase {
            name: DB.to_string(),
            if_exists: false,
        })
        .unwrap();
        assert!(db.rows(Statement::ShowDatabases).is_empty());
    }

    #[test]
    fn test_analyzer_errors_surface() {
        let db = setup(1);
        let s = Select {
            projection: vec![item("a")],
            from: Some(TableRef::new("missing")),
            ..Select::default()
        };
        assert_eq!(
            Err(EngineError::Catalog(CatalogError::TableNameDoesNotExist(
                "missing".to_string()
            ))),
            db.run(Statement::Select(s)).map(|r| r.len())
        );
        let res = db.run(Statement::Select(select(vec![item("nope")])));
        assert_eq!(
            Err(EngineError::UnknownColumn("nope".to_string())),
            res.map(|r| r.len())
        );
        let bad_insert = insert(vec![(1, string("x"), string("y"))]);
        assert!(matches!(db.run(bad_insert), Err(EngineError::TypeMismatch(_))));
    }

    #[test]
    fn test_cancellation_and_deadline() {
        let db = setup(2);
        fill(&db, 8);
        let stmt = Statement::Select(select(vec![item("a")]));

        let token = CancelToken::new();
        token.cancel();
        let ctx = db.ctx.clone().with_cancel(token);
        assert_eq!(
            Err(EngineError::Cancelled),
            db.planner.run(&ctx, &stmt).map(|r| r.len())
        );

        let plan = db.planner.compile_plan(&db.ctx, &stmt).unwrap();
        let ctx = db.ctx.clone().with_timeout(Duration::from_millis(0));
        assert_eq!(
            Err(EngineError::Timeout),
            db.planner.execute(&ctx, &plan).map(|r| r.len())
        );
        assert_eq!(8, db.planner.execute(&db.ctx, &plan).unwrap().len());
    }

    #[test]
    fn test_distinct_spill_is_transparent() {
        let db = setup_with(
            1,
            |config| {
                config.page_size = 104;
                config.buffer_pool_pages = 4;
                config.shard_width = 1 << 20;
            },
            None,
        );
        let rows = (1..=600)
            .map(|id| (id, Value::Int(id % 300), string("s")))
            .collect();
        db.run(insert(rows)).unwrap();
        let mut s = select(vec![item("a"), item("b")]);
        s.distinct = true;
        let result = db.run(Statement::Select(s)).unwrap();
        assert_eq!(300, result.len());
        let expected: Vec<Row> = (1..=300)
            .map(|i| Row::new(vec![Value::Int(i % 300), string("s")]))
            .collect();
        assert_eq!(expected, result.rows().to_vec());
        assert!(!result.warnings().is_empty());
        assert!(result.warnings()[0].starts_with("distinct spilled to disk"));
    }

    #[test]
    fn test_rows_conform_to_root_schema() {
        let db = setup(2);
        fill(&db, 9);
        let mut distinct = select(vec![item("a"), item("b")]);
        distinct.distinct = true;
        let mut ordered = select(vec![SelectItem::Wildcard(None)]);
        ordered.order_by = vec![OrderByItem {
            expr: Expr::column("b"),
            descending: true,
        }];
        let no_from = Select {
            projection: vec![SelectItem::Expr {
                expr: Expr::literal(Value::Null),
                alias: Some("n".to_string()),
            }],
            ..Select::default()
        };
        let stmts = vec![
            Statement::Select(select(vec![SelectItem::Wildcard(None)])),
            Statement::Select(distinct),
            Statement::Select(ordered),
            Statement::Select(no_from),
            Statement::ShowDatabases,
            Statement::ShowTables,
            Statement::ShowColumns {
                table: "t".to_string(),
            },
        ];
        for stmt in &stmts {
            assert!(!run_conforming(&db, stmt.clone()).is_empty());
        }

        db.run(add_column("c", DataType::Int, true)).unwrap();
        db.run(Statement::AlterTable {
            name: "t".to_string(),
            operation: AlterTableOperation::DropColumn("b".to_string()),
        })
        .unwrap();
        let rows = run_conforming(&db, Statement::Select(select(vec![SelectItem::Wildcard(None)])));
        assert_eq!(9, rows.len());
        assert_eq!(Some(&Value::Null), rows[0].get(2));
        for stmt in stmts.into_iter().skip(4) {
            run_conforming(&db, stmt);
        }
    }

    #[test]
    fn test_add_non_nullable_column() {
        let db = setup(1);
        fill(&db, 3);
        let res = db.run(add_column("c", DataType::Int, false));
        assert!(matches!(res, Err(EngineError::ValidationError(_))));
        let rows = run_conforming(&db, Statement::Select(select(vec![SelectItem::Wildcard(None)])));
        assert_eq!(3, rows.len());
        assert_eq!(3, rows[0].size());

        // allowed while the table is empty
        db.run(create_table("u")).unwrap();
        db.run(Statement::AlterTable {
            name: "u".to_string(),
            operation: AlterTableOperation::AddColumn(column("c", DataType::Int, false)),
        })
        .unwrap();

        // rows inserted between compiling and running the ALTER are seen
        let db = setup(1);
        let plan = db
            .planner
            .compile_plan(&db.ctx, &add_column("c", DataType::Int, false))
            .unwrap();
        fill(&db, 2);
        assert!(matches!(
            db.planner.execute(&db.ctx, &plan),
            Err(EngineError::ValidationError(_))
        ));
        assert_eq!(3, db.rows(Statement::ShowColumns { table: "t".to_string() }).len());
    }

    #[test]
    fn test_seeded_filter_reads_outer_row() {
        let db = setup(2);
        fill(&db, 10);
        let plan = db
            .planner
            .compile_plan(&db.ctx, &Statement::Select(select(vec![item(ID_COLUMN), item("a")])))
            .unwrap();
        assert_eq!("PlanOpFanOut", plan.name());
        // a = outer.$0, evaluated below the fan-out on every node
        let predicate = PlanExpr::binary(PlanExpr::Column(1), BinaryOp::Eq, PlanExpr::Outer(0));
        let filter = PlanOperator::Filter(Filter::new(predicate, plan.children()[0].clone()));
        let seeded = plan.with_children(vec![Arc::new(filter)]).unwrap();
        assert_eq!(plan.schema(), seeded.schema());

        let seed = Row::new(vec![Value::Int(2)]);
        let mut iter = seeded.iterator(&db.ctx, Some(&seed)).unwrap();
        let rows = drain(iter.as_mut(), &db.ctx).unwrap();
        assert_eq!(vec![2, 8, 5], ids(&rows));

        let seed = Row::new(vec![Value::Int(7)]);
        let mut iter = seeded.iterator(&db.ctx, Some(&seed)).unwrap();
        assert!(drain(iter.as_mut(), &db.ctx).unwrap().is_empty());

        // without a seed the outer reference cannot be evaluated
        let mut iter = seeded.iterator(&db.ctx, None).unwrap();
        assert!(matches!(
            drain(iter.as_mut(), &db.ctx),
            Err(EngineError::InternalError(_))
        ));
        // the unseeded plan is unaffected
        assert_eq!(10, db.planner.execute(&db.ctx, &plan).unwrap().len());
    }
}
