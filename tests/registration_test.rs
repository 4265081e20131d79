//! End-to-end registration scenarios on synthetic blobs

mod common;

use common::*;
use lddmm_core::config::ChannelSpec;
use lddmm_core::transport::{compute_mappings, jacobian_determinant};
use lddmm_core::{
    ChannelImages, Grid, LddmmError, LddmmSolver, Padding, ScalarField, Termination, VelocityField,
};

#[test]
fn test_zero_iterations_give_identity() {
    init_tracing();
    let (template, target) = shifted_pair(12, 2.5, 1.0);
    let cfg = blob_config(2.0, 0.5, 0.01, 0);
    let mut solver = LddmmSolver::new(cfg, vec![ChannelImages::new(template, target).unwrap()], None).unwrap();
    let result = solver.run().unwrap();

    assert_eq!(result.iterations, 0);
    assert_eq!(result.termination, Termination::IterationLimitReached);
    assert!(result.history.is_empty());
    assert_eq!(result.forward_deformation().max_norm(), 0.0);
    assert_eq!(result.inverse_deformation().max_norm(), 0.0);
    let jac = result.jacobian();
    assert!(jac.determinant.data().iter().all(|&v| v == 1.0));
    assert!(!jac.report.has_folding());
}

#[test]
fn test_zero_velocity_jacobian_is_one_on_interior() {
    let grid = Grid::new(14, 12, 10);
    let (forward, backward) = compute_mappings(&VelocityField::zeros(grid, 6));
    for t in 0..6 {
        for mapping in [forward.frame(t), backward.frame(t)] {
            let jac = jacobian_determinant(mapping, 2);
            assert!(jac.determinant.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
        }
    }
}

#[test]
fn test_self_registration_converges_immediately() {
    init_tracing();
    let (template, _) = shifted_pair(16, 3.0, 0.0);
    let cfg = blob_config(2.0, 0.5, 0.01, 20);
    let ch = ChannelImages::new(template.clone(), template).unwrap();
    let result = LddmmSolver::new(cfg, vec![ch], None).unwrap().run().unwrap();

    assert_eq!(result.termination, Termination::Converged);
    assert!(result.iterations <= 1);
    assert!(result.history[0].max_gradient < 1e-10);
    assert!(result.forward_deformation().max_norm() < 1e-9);
}

#[test]
fn test_translated_blob_is_recovered() {
    init_tracing();
    // 0.5 mm voxels: the 2 mm kernel spans 4 voxels
    let grid = Grid::new(32, 32, 32).with_spacing([0.5; 3]);
    let (template, target) = blob_pair(grid, 2.0, 2.0);
    let region = half_max_region(&template);
    let target_region = half_max_region(&target);
    let cfg = blob_config(2.0, 1.0, 0.01, 50);
    let ch = ChannelImages::new(template, target).unwrap();
    let result = LddmmSolver::new(cfg, vec![ch], None).unwrap().run().unwrap();

    assert_eq!(result.termination, Termination::Converged, "history: {:?}", result.history);
    assert!(result.iterations < 50);

    // Template voxels land two voxels further along x in the target
    let inverse = result.inverse_deformation();
    let mean_dx = masked_mean(inverse.component(0), &region);
    assert!(mean_dx > 1.5 && mean_dx < 2.5, "mean x displacement {}", mean_dx);
    let mean_dy = masked_mean(inverse.component(1), &region);
    assert!(mean_dy.abs() < 0.2, "mean y displacement {}", mean_dy);

    // Target voxels sample the template two voxels back
    let forward = result.forward_deformation();
    let mean_fx = masked_mean(forward.component(0), &target_region);
    assert!(mean_fx < -1.5 && mean_fx > -2.5, "mean forward x displacement {}", mean_fx);

    let jac = result.jacobian();
    assert!(!jac.report.has_folding(), "{:?}", jac.report);
    assert!(jac.report.min >= 0.8 && jac.report.max <= 1.2, "{:?}", jac.report);

    // Matching improved
    let first = result.history.first().unwrap().ssd;
    let last = result.history.last().unwrap().ssd;
    assert!(last < 0.1 * first, "ssd {} -> {}", first, last);
}

#[test]
fn test_larger_update_bound_needs_no_more_iterations() {
    init_tracing();
    let run = |max_update: f64| {
        let (template, target) = shifted_pair(24, 3.5, 1.5);
        let mut cfg = blob_config(2.0, max_update, 0.05, 60);
        cfg.time.nb_time_subdiv = 5;
        let ch = ChannelImages::new(template, target).unwrap();
        LddmmSolver::new(cfg, vec![ch], None).unwrap().run().unwrap()
    };
    let slow = run(0.25);
    let fast = run(0.5);
    assert_eq!(slow.termination, Termination::Converged);
    assert_eq!(fast.termination, Termination::Converged);
    assert!(
        fast.iterations <= slow.iterations,
        "max update 0.5 took {} iterations, 0.25 took {}",
        fast.iterations,
        slow.iterations
    );
}

#[test]
fn test_nan_in_image_aborts_with_location() {
    let (mut template, target) = shifted_pair(12, 2.5, 1.0);
    template.set(5, 5, 5, f64::NAN);
    let cfg = blob_config(2.0, 0.5, 0.01, 5);
    let ch = ChannelImages::new(template, target).unwrap();
    let err = LddmmSolver::new(cfg, vec![ch], None).unwrap().run().unwrap_err();
    match err {
        LddmmError::NumericDivergence { iteration, time, voxel, .. } => {
            assert_eq!(iteration, 0);
            assert_eq!(time, 0);
            // Interpolation and differencing spread the NaN by at most two voxels
            assert!(voxel.iter().all(|&c| c.abs_diff(5) <= 2), "voxel {:?}", voxel);
        }
        other => panic!("expected numeric divergence, got {other}"),
    }
}

#[test]
fn test_configuration_errors_before_running() {
    let (template, target) = shifted_pair(8, 2.0, 1.0);

    let mut cfg = blob_config(2.0, 0.5, 0.01, 5);
    cfg.kernels.kernels[0].sigma = [2.0, -1.0, 2.0];
    let ch = ChannelImages::new(template.clone(), target.clone()).unwrap();
    let err = LddmmSolver::new(cfg, vec![ch], None).unwrap_err();
    assert!(matches!(err, LddmmError::InvalidConfiguration(_)));

    let other = ScalarField::zeros(Grid::new(8, 8, 9));
    assert!(matches!(
        ChannelImages::new(template.clone(), other.clone()),
        Err(LddmmError::ShapeMismatch { .. })
    ));

    let ch = ChannelImages::new(template.clone(), target.clone()).unwrap();
    let err = LddmmSolver::new(blob_config(2.0, 0.5, 0.01, 5), vec![ch], Some(other)).unwrap_err();
    assert!(err.is_configuration());

    // Second channel on a different lattice
    let small = ScalarField::zeros(Grid::new(6, 6, 6));
    let channels = vec![
        ChannelImages::new(template.clone(), target.clone()).unwrap(),
        ChannelImages::new(small.clone(), small).unwrap(),
    ];
    assert!(LddmmSolver::new(blob_config(2.0, 0.5, 0.01, 5), channels, None).is_err());
}

#[test]
fn test_zero_weight_channel_has_no_effect() {
    let (template, target) = shifted_pair(12, 2.5, 1.0);
    let noise = ScalarField::from_fn(*template.grid(), |i, j, k| ((i * 31 + j * 17 + k * 7) % 11) as f64);

    let single = LddmmSolver::new(
        blob_config(2.0, 0.5, 0.01, 3),
        vec![ChannelImages::new(template.clone(), target.clone()).unwrap()],
        None,
    )
    .unwrap()
    .run()
    .unwrap();

    let mut cfg = blob_config(2.0, 0.5, 0.01, 3);
    cfg.channels.channels = vec![ChannelSpec::default(), ChannelSpec { weight: 0.0, ..Default::default() }];
    let dual = LddmmSolver::new(
        cfg,
        vec![
            ChannelImages::new(template, target).unwrap(),
            ChannelImages::new(noise.clone(), noise.scale(2.0)).unwrap(),
        ],
        None,
    )
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(single.iterations, dual.iterations);
    assert_eq!(single.velocity, dual.velocity);
}

#[test]
fn test_grey_level_alignment_removes_intensity_offset() {
    let (template, _) = shifted_pair(12, 2.5, 0.0);
    let template = ScalarField::from_vec(
        *template.grid(),
        template.data().iter().map(|&v| if v > 1.0 { v } else { 0.0 }).collect(),
    )
    .unwrap();
    let target = ScalarField::from_vec(
        *template.grid(),
        template.data().iter().map(|&v| if v > 0.0 { 2.0 * v + 10.0 } else { 0.0 }).collect(),
    )
    .unwrap();

    let first_gradient = |align: bool| {
        let mut cfg = blob_config(2.0, 0.5, 0.01, 1);
        cfg.channels.grey_level_alignment = align;
        cfg.region.padding = Padding::Constant(0.0);
        let ch = ChannelImages::new(template.clone(), target.clone()).unwrap();
        let result = LddmmSolver::new(cfg, vec![ch], None).unwrap().run().unwrap();
        result.history[0].max_gradient
    };

    let raw = first_gradient(false);
    let aligned = first_gradient(true);
    assert!(raw > 0.0);
    assert!(aligned < 1e-6 * raw, "aligned {} vs raw {}", aligned, raw);
}

#[test]
fn test_progress_callback_reports_each_iteration() {
    let (template, target) = shifted_pair(10, 2.0, 1.0);
    let mut cfg = blob_config(2.0, 0.3, 0.0, 3);
    cfg.time.nb_time_subdiv = 3;
    let ch = ChannelImages::new(template, target).unwrap();
    let mut calls = Vec::new();
    let result = LddmmSolver::new(cfg, vec![ch], None)
        .unwrap()
        .run_with_progress(|it, cap| calls.push((it, cap)))
        .unwrap();
    assert_eq!(result.iterations, 3);
    assert_eq!(calls, vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
}
