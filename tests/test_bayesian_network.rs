#[cfg(test)]
mod test_bayesian_network {
    use probnet::common::spec::{InferenceQuery, NetworkSpec};
    use probnet::graph::ParentAssignment;
    use probnet::inference::{InferenceMethod, all_marginals, infer, infer_with, run_query};
    use probnet::{BayesianNetwork, ErrorKind, ProbError};
    use std::collections::BTreeMap;

    const SPRINKLER: &str = r#"{
        "nodes": [
            {"id": "Cloudy", "label": "Overcast sky"},
            {"id": "Sprinkler"},
            {"id": "Rain"},
            {"id": "WetGrass"}
        ],
        "edges": [
            {"from": "Cloudy", "to": "Sprinkler"},
            {"from": "Cloudy", "to": "Rain"},
            {"from": "Sprinkler", "to": "WetGrass"},
            {"from": "Rain", "to": "WetGrass"}
        ],
        "cpt": {
            "Cloudy": 0.5,
            "Sprinkler": {"Cloudy=True": 0.1, "Cloudy=False": 0.5},
            "Rain": {"{\"Cloudy\": true}": 0.8, "{\"Cloudy\": false}": 0.2},
            "WetGrass": {
                "Sprinkler=True,Rain=True": 0.99,
                "Rain=False|Sprinkler=True": 0.9,
                "Sprinkler=False,Rain=True": {"True": 0.9, "False": 0.1},
                "Sprinkler=False,Rain=False": 0.0
            }
        }
    }"#;

    fn sprinkler() -> BayesianNetwork {
        let spec: NetworkSpec = serde_json::from_str(SPRINKLER).unwrap();
        BayesianNetwork::from_spec(&spec).unwrap()
    }

    fn evidence(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Posterior by summing the full joint over every complete assignment,
    /// counting through each node's domain in mixed radix.
    fn brute_force(
        net: &BayesianNetwork,
        query: &str,
        ev: &BTreeMap<String, String>,
    ) -> BTreeMap<String, f64> {
        let ids: Vec<String> = net.node_ids().iter().map(|s| s.to_string()).collect();
        let domains: Vec<Vec<String>> =
            ids.iter().map(|id| net.values(id).unwrap().to_vec()).collect();
        let mut counter = vec![0; ids.len()];
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        loop {
            let assignment: BTreeMap<String, String> = ids
                .iter()
                .zip(&counter)
                .zip(&domains)
                .map(|((id, &c), domain)| (id.clone(), domain[c].clone()))
                .collect();
            if ev.iter().all(|(k, v)| assignment[k] == *v) {
                let p = net.joint_probability(&assignment).unwrap();
                *totals.entry(assignment[query].clone()).or_insert(0.0) += p;
            }

            let mut i = 0;
            while i < counter.len() {
                counter[i] += 1;
                if counter[i] < domains[i].len() {
                    break;
                }
                counter[i] = 0;
                i += 1;
            }
            if i == counter.len() {
                break;
            }
        }
        let z: f64 = totals.values().sum();
        totals.into_iter().map(|(k, v)| (k, v / z)).collect()
    }

    /// `A` and `B` take three values; `C` is binary with both as parents.
    fn three_valued() -> BayesianNetwork {
        let spec: NetworkSpec = serde_json::from_str(
            r#"{
                "nodes": [
                    {"id": "A", "values": ["a0", "a1", "a2"]},
                    {"id": "B", "values": ["b0", "b1", "b2"]},
                    {"id": "C"}
                ],
                "edges": [
                    {"from": "A", "to": "B"},
                    {"from": "A", "to": "C"},
                    {"from": "B", "to": "C"}
                ],
                "cpt": {
                    "A": {"a0": 0.1, "a1": 0.3, "a2": 0.6},
                    "B": {
                        "A=a0": {"b0": 0.7, "b1": 0.2, "b2": 0.1},
                        "A=a1": {"b0": 0.2, "b1": 0.5, "b2": 0.3},
                        "A=a2": {"b0": 0.1, "b1": 0.1, "b2": 0.8}
                    },
                    "C": {
                        "A=a0,B=b0": 0.9, "A=a0,B=b1": 0.6, "A=a0,B=b2": 0.3,
                        "A=a1,B=b0": 0.8, "A=a1,B=b1": 0.5, "A=a1,B=b2": 0.2,
                        "A=a2,B=b0": 0.7, "A=a2,B=b1": 0.4, "A=a2,B=b2": 0.1
                    }
                }
            }"#,
        )
        .unwrap();
        BayesianNetwork::from_spec(&spec).unwrap()
    }

    #[test]
    fn test_rain_wet_grass_bayes_rule() {
        let spec: NetworkSpec = serde_json::from_str(
            r#"{
                "nodes": [{"id": "Rain"}, {"id": "WetGrass"}],
                "edges": [{"from": "Rain", "to": "WetGrass"}],
                "cpt": {
                    "Rain": 0.2,
                    "WetGrass": {"Rain=True": 0.9, "Rain=False": 0.1}
                }
            }"#,
        )
        .unwrap();
        let net = BayesianNetwork::from_spec(&spec).unwrap();
        let query = InferenceQuery::new("Rain").with_evidence("WetGrass", true);
        let result = run_query(&net, &query, InferenceMethod::Enumeration).unwrap();
        let p = result.probability("True").unwrap();
        assert!((p - 0.18 / 0.26).abs() < 1e-9);
        assert!((p - 0.6923).abs() < 1e-4);
    }

    #[test]
    fn test_both_key_encodings_build_one_table() {
        let net = sprinkler();
        assert!(net.is_valid());
        assert_eq!(net.label("Cloudy").unwrap(), Some("Overcast sky"));
        assert_eq!(net.cpt("WetGrass").unwrap().row_count(), 4);
        let parents = std::collections::HashMap::from([
            ("Sprinkler".to_string(), "True".to_string()),
            ("Rain".to_string(), "False".to_string()),
        ]);
        assert_eq!(net.probability("WetGrass", "True", &parents).unwrap(), 0.9);
    }

    #[test]
    fn test_enumeration_matches_elimination_and_brute_force() {
        let net = sprinkler();
        let cases: Vec<BTreeMap<String, String>> = vec![
            BTreeMap::new(),
            evidence(&[("WetGrass", "True")]),
            evidence(&[("WetGrass", "True"), ("Cloudy", "False")]),
            evidence(&[("Sprinkler", "False"), ("Rain", "True")]),
        ];
        for ev in &cases {
            for query in net.node_ids() {
                if ev.contains_key(query) {
                    continue;
                }
                let a = infer_with(&net, query, ev, InferenceMethod::Enumeration).unwrap();
                let b = infer_with(&net, query, ev, InferenceMethod::VariableElimination).unwrap();
                let expected = brute_force(&net, query, ev);
                for (value, p) in &a.distribution {
                    assert!((p - b.distribution[value]).abs() < 1e-6, "{query} | {ev:?}");
                    assert!((p - expected[value]).abs() < 1e-9, "{query} | {ev:?}");
                }
            }
        }
    }

    #[test]
    fn test_multi_valued_parents_agree_across_methods() {
        let net = three_valued();
        let cases = [
            ("A", evidence(&[("C", "True")])),
            ("B", evidence(&[("C", "True")])),
            ("A", evidence(&[("B", "b2")])),
            ("C", evidence(&[("B", "b1")])),
            ("B", evidence(&[("A", "a1"), ("C", "False")])),
            ("A", BTreeMap::new()),
        ];
        for (query, ev) in &cases {
            let a = infer_with(&net, query, ev, InferenceMethod::Enumeration).unwrap();
            let b = infer_with(&net, query, ev, InferenceMethod::VariableElimination).unwrap();
            let expected = brute_force(&net, query, ev);
            assert_eq!(a.distribution.len(), expected.len());
            for (value, p) in &a.distribution {
                assert!((p - b.distribution[value]).abs() < 1e-12, "{query} | {ev:?}");
                assert!((p - expected[value]).abs() < 1e-12, "{query} | {ev:?}");
            }
        }

        // P(C=True | A=a2, B=b0) is read straight from its row.
        let direct = infer(&net, "C", &evidence(&[("A", "a2"), ("B", "b0")])).unwrap();
        assert!((direct.probability("True").unwrap() - 0.7).abs() < 1e-12);

        // P(A=a0, C=True) = 0.1 * (0.7 * 0.9 + 0.2 * 0.6 + 0.1 * 0.3)
        let joint_a0 = 0.1 * (0.63 + 0.12 + 0.03);
        let result = infer(&net, "A", &evidence(&[("C", "True")])).unwrap();
        let a0 = result.probability("a0").unwrap();
        assert!((a0 * result.normalization_constant - joint_a0).abs() < 1e-12);
    }

    #[test]
    fn test_every_cpt_row_is_a_distribution() {
        for net in [sprinkler(), three_valued()] {
            for id in net.node_ids() {
                let table = net.cpt(id).unwrap();
                assert_eq!(table.node(), id);
                let expected_rows: usize = table
                    .parents()
                    .iter()
                    .map(|p| net.values(p).unwrap().len())
                    .product();
                assert_eq!(table.row_count(), expected_rows);

                let mut seen = 0;
                for (assignment, row) in table.rows() {
                    assert_eq!(row.len(), table.values().len());
                    assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-3, "{id} | {assignment}");
                    assert_eq!(table.row(&assignment).unwrap(), row);
                    seen += 1;
                }
                assert_eq!(seen, expected_rows);
            }
        }

        let net = three_valued();
        let c = net.cpt("C").unwrap();
        let key = ParentAssignment::new([("B", "b1"), ("A", "a2")]);
        assert_eq!(c.row(&key).unwrap(), &[0.4, 1.0 - 0.4]);
    }

    #[test]
    fn test_root_query_without_evidence_is_prior() {
        let net = sprinkler();
        let result = infer(&net, "Cloudy", &BTreeMap::new()).unwrap();
        assert!((result.probability("True").unwrap() - 0.5).abs() < 1e-12);
        assert!((result.normalization_constant - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_explaining_away() {
        let net = sprinkler();
        let wet = infer(&net, "Sprinkler", &evidence(&[("WetGrass", "True")])).unwrap();
        let wet_and_rain = infer(
            &net,
            "Sprinkler",
            &evidence(&[("WetGrass", "True"), ("Rain", "True")]),
        )
        .unwrap();
        assert!(wet_and_rain.probability("True").unwrap() < wet.probability("True").unwrap());
    }

    #[test]
    fn test_zero_probability_evidence() {
        let net = sprinkler();
        let err = infer(
            &net,
            "Cloudy",
            &evidence(&[("WetGrass", "True"), ("Sprinkler", "False"), ("Rain", "False")]),
        )
        .unwrap_err();
        assert_eq!(err, ProbError::InconsistentEvidence);
        assert_eq!(err.kind(), ErrorKind::Normalization);
    }

    #[test]
    fn test_all_marginals_skip_evidence() {
        let net = sprinkler();
        let ev = evidence(&[("WetGrass", "True")]);
        let marginals = all_marginals(&net, &ev, InferenceMethod::VariableElimination).unwrap();
        assert_eq!(marginals.len(), 3);
        assert!(!marginals.contains_key("WetGrass"));
        for result in marginals.values() {
            let total: f64 = result.distribution.values().sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_structural_defects_block_inference() {
        let spec: NetworkSpec = serde_json::from_str(
            r#"{
                "nodes": [{"id": "A"}, {"id": "B"}],
                "edges": [{"from": "A", "to": "B"}, {"from": "B", "to": "A"}],
                "cpt": {"A": {"B=True": 0.5, "B=False": 0.5}, "B": {"A=True": 0.5, "A=False": 0.5}}
            }"#,
        )
        .unwrap();
        let err = BayesianNetwork::from_spec(&spec).unwrap_err();
        assert!(matches!(err, ProbError::CycleDetected { .. }));
        assert_eq!(err.kind(), ErrorKind::Structural);

        let network = BayesianNetwork::assemble(&spec, 1e-3);
        assert!(!network.validate().is_empty());
        assert!(infer(&network, "A", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_missing_row_is_rejected_not_defaulted() {
        let spec: NetworkSpec = serde_json::from_str(
            r#"{
                "nodes": [{"id": "A"}, {"id": "B"}],
                "edges": [{"from": "A", "to": "B"}],
                "cpt": {"A": 0.3, "B": {"A=True": 0.9}}
            }"#,
        )
        .unwrap();
        assert!(matches!(
            BayesianNetwork::from_spec(&spec),
            Err(ProbError::MissingCptRow { .. })
        ));
    }

    #[test]
    fn test_duplicate_row_across_encodings() {
        let spec: NetworkSpec = serde_json::from_str(
            r#"{
                "nodes": [{"id": "A"}, {"id": "B"}],
                "edges": [{"from": "A", "to": "B"}],
                "cpt": {
                    "A": 0.3,
                    "B": {"A=True": 0.9, "{\"A\": true}": 0.8, "A=False": 0.1}
                }
            }"#,
        )
        .unwrap();
        let defects = BayesianNetwork::assemble(&spec, 1e-3).validate();
        assert!(defects.iter().any(|d| matches!(d, ProbError::DuplicateCptRow { .. })));
    }
}
