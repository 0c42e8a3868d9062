//! Tests which load and run the demo catchment model.
use nbsopt::input::load_model;
use nbsopt::model::Model;
use nbsopt::simulation::pareto::ParetoOptimiser;
use nbsopt::simulation::{evaluate_portfolio, run_baseline, run_optimisation};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

/// Get the path to the demo model.
fn get_model_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("catchment")
}

/// Load the demo model, with fewer iterations so the tests run quickly
fn load_demo_model() -> Model {
    let mut model = load_model(get_model_dir()).unwrap();
    model.parameters.iterations = 40;
    model.parameters.search.iterations = Some(20);
    model.parameters.search.max_evaluations = 40;
    model
}

#[test]
fn test_load_demo_model() {
    let model = load_model(get_model_dir()).unwrap();
    assert_eq!((model.grid.rows(), model.grid.cols()), (4, 4));
    assert_eq!(model.grid.districts().len(), 3);
    assert_eq!(model.interventions.len(), 4);
    assert_eq!(model.portfolios.len(), 3);
    assert_eq!(model.climate.scenarios().count(), 3);
}

#[test]
fn test_demo_baseline_increases_with_warming() {
    let model = load_demo_model();
    let results = run_baseline(&model).unwrap();
    let losses = results.iter().map(|r| r.loss.mean.value()).collect::<Vec<_>>();
    assert_eq!(results[0].scenario.0.as_ref(), "current");
    assert!(losses[0] > 0.0);

    // Same random streams, more intense and more frequent rain
    assert!(losses[0] < losses[1] && losses[1] < losses[2]);
}

#[test]
fn test_demo_named_portfolios_reduce_losses() {
    let model = load_demo_model();
    for (id, portfolio) in &model.portfolios {
        let appraisal = evaluate_portfolio(&model, portfolio).unwrap();
        let result = &appraisal.candidate.result;
        assert!(
            result.loss.mean <= result.baseline_loss.mean,
            "portfolio {id} increased losses"
        );
        assert!(appraisal.total_spend <= model.parameters.budget);
    }
}

#[test]
fn test_demo_frontier_is_an_antichain() {
    let model = load_demo_model();
    let outcome = ParetoOptimiser::new(&model)
        .unwrap()
        .run(&AtomicBool::new(false))
        .unwrap();
    assert!(!outcome.frontier.is_empty());
    assert!(outcome.evaluations <= 40);

    let epsilon = model.parameters.search.epsilon;
    let members = outcome.frontier.members();
    for a in members {
        for b in members {
            assert!(!a.objectives.dominates(&b.objectives, epsilon));
        }
    }
}

#[test]
fn test_demo_recommendation() {
    let model = load_demo_model();
    let result = run_optimisation(&model, &AtomicBool::new(false)).unwrap();
    let recommendation = result.recommendation.unwrap();
    assert!(
        result
            .search
            .frontier
            .members()
            .iter()
            .any(|member| member.portfolio == recommendation.candidate.portfolio)
    );

    // Re-evaluated with the full number of iterations
    assert_eq!(
        recommendation.candidate.result.iterations_requested,
        model.parameters.iterations
    );
}
