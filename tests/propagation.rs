use approx::assert_relative_eq;
use ndarray::Array4;

use seismic_wave_propagator::boundary::{DecayParams, PmlParams};
use seismic_wave_propagator::config::{OutputConfig, RickerConfig, StationConfig};
use seismic_wave_propagator::diagnostics::SliceKind;
use seismic_wave_propagator::source::{ricker, MultiSourceData, SourcePoint};
use seismic_wave_propagator::wavefield::{TXX, TXZ, TYZ, TZZ, VX, VY, VZ};
use seismic_wave_propagator::{
    gather_wavefield, run_ranks, Config, Grid, Medium, PropagationError, RankOutput, SchemeKind,
    SimulationParams, Subdomain,
};

const VP: f64 = 3000.0;
const VS: f64 = 1700.0;
const RHO: f64 = 2500.0;

fn homogeneous(sub: &Subdomain) -> Result<Medium, PropagationError> {
    Ok(Medium::homogeneous(sub.padded(), VP, VS, RHO))
}

fn ricker_at(index: [usize; 3]) -> RickerConfig {
    RickerConfig {
        index,
        amplitude: 1e15,
        frequency: 40.0,
        direction: [0.3, -0.2, 1.0],
    }
}

/// Free surface, CPML and sponge all active.
fn bounded_params(scheme: SchemeKind, nt: usize) -> SimulationParams {
    let mut params = SimulationParams::new(0.005, nt, scheme);
    params.free_surface = true;
    params.pml = Some(PmlParams {
        thickness: 3,
        reflection: 1e-3,
        kappa_max: 1.0,
        alpha_max: std::f64::consts::PI * 40.0,
    });
    params.decay = Some(DecayParams {
        thickness: 4,
        edge_factor: 0.92,
    });
    params.vp_max = Some(VP);
    params
}

fn run(grid: &Grid, params: &SimulationParams, multi: Option<&MultiSourceData>) -> Vec<RankOutput> {
    run_ranks(grid, params, multi, homogeneous).unwrap()
}

fn assert_fields_match(a: &Array4<f64>, b: &Array4<f64>) {
    assert_eq!(a.dim(), b.dim());
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    assert!(scale > 0.0, "field never left zero");
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() <= 1e-9 * scale, "{} vs {}", x, y);
    }
}

#[test]
fn zero_field_stays_zero() {
    let grid = Grid::new([12, 12, 12], 100.0, [2, 1, 1]);
    for scheme in [SchemeKind::FiniteDifference, SchemeKind::AlternatingFlux] {
        let params = bounded_params(scheme, 6);
        let outputs = run(&grid, &params, None);
        let global = gather_wavefield(&grid, &outputs);
        assert!(global.iter().all(|&v| v == 0.0), "{:?} created motion from nothing", scheme);
    }
}

#[test]
fn decomposed_run_matches_single_rank_finite_difference() {
    let params = {
        let mut p = bounded_params(SchemeKind::FiniteDifference, 8);
        p.ricker = Some(ricker_at([5, 6, 7]));
        p
    };
    let single = Grid::new([12, 12, 12], 100.0, [1, 1, 1]);
    let reference = gather_wavefield(&single, &run(&single, &params, None));

    for ranks in [[2, 2, 1], [1, 1, 2], [2, 1, 2]] {
        let grid = Grid::new([12, 12, 12], 100.0, ranks);
        let outputs = run(&grid, &params, None);
        assert_eq!(outputs.len(), grid.rank_count());
        assert_fields_match(&reference, &gather_wavefield(&grid, &outputs));
    }
}

#[test]
fn decomposed_run_matches_single_rank_alternating_flux() {
    let params = {
        let mut p = bounded_params(SchemeKind::AlternatingFlux, 6);
        p.ricker = Some(ricker_at([6, 5, 9]));
        p
    };
    let single = Grid::new([12, 12, 12], 100.0, [1, 1, 1]);
    let reference = gather_wavefield(&single, &run(&single, &params, None));

    let grid = Grid::new([12, 12, 12], 100.0, [2, 1, 2]);
    assert_fields_match(&reference, &gather_wavefield(&grid, &run(&grid, &params, None)));
}

#[test]
fn distributed_source_across_rank_boundary() {
    let nt = 5;
    let data = MultiSourceData {
        points: vec![SourcePoint {
            index: [6, 6, 5],
            tensor: [1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            rate: vec![1e13; nt],
        }],
    };
    let params = SimulationParams::new(0.005, nt, SchemeKind::FiniteDifference);

    let single = Grid::new([12, 12, 12], 100.0, [1, 1, 1]);
    let reference = gather_wavefield(&single, &run(&single, &params, Some(&data)));
    let grid = Grid::new([12, 12, 12], 100.0, [2, 2, 1]);
    assert_fields_match(&reference, &gather_wavefield(&grid, &run(&grid, &params, Some(&data))));
}

#[test]
fn ricker_injection_after_one_step() {
    let dt = 1e-5;
    let config = ricker_at([8, 8, 8]);
    let mut params = SimulationParams::new(dt, 1, SchemeKind::FiniteDifference);
    params.ricker = Some(config.clone());

    let grid = Grid::new([16, 16, 16], 100.0, [1, 1, 1]);
    let global = gather_wavefield(&grid, &run(&grid, &params, None));

    let force = config.amplitude * ricker(-1.2 / config.frequency, config.frequency);
    let expected = force * dt / (RHO * 100.0f64.powi(3));
    assert_relative_eq!(global[[VZ, 8, 8, 8]], expected, max_relative = 1e-4);
    assert_relative_eq!(global[[VX, 8, 8, 8]], 0.3 * expected, max_relative = 1e-4);
}

/// Field after four steps of a Ricker source at the centre of a reflecting
/// 12³ box, dt = 5 ms, dh = 100 m. Values come from an independent scalar
/// re-implementation of both schemes.
fn near_field_after_four_steps(scheme: SchemeKind) -> Array4<f64> {
    let mut params = SimulationParams::new(0.005, 4, scheme);
    params.ricker = Some(ricker_at([6, 6, 6]));
    let grid = Grid::new([12, 12, 12], 100.0, [1, 1, 1]);
    gather_wavefield(&grid, &run(&grid, &params, None))
}

fn assert_golden(field: &Array4<f64>, golden: &[(usize, [usize; 3], f64)]) {
    for &(c, [i, j, k], expected) in golden {
        assert_relative_eq!(field[[c, i, j, k]], expected, max_relative = 1e-8);
    }
}

#[test]
fn finite_difference_near_field_matches_golden_values() {
    let field = near_field_after_four_steps(SchemeKind::FiniteDifference);
    assert_golden(
        &field,
        &[
            (VX, [6, 6, 6], -114.52156928143194),
            (VY, [6, 6, 6], 71.17182085393381),
            (VZ, [6, 6, 6], -367.38121647596745),
            (TXZ, [6, 6, 6], -35728.07045127079),
            (TXX, [7, 6, 6], 96699884.52337572),
            (TXZ, [5, 6, 6], -102478308.8292271),
            (TYZ, [6, 7, 6], 102445145.07168812),
            (VY, [6, 5, 6], 3.023513722586246),
            (VZ, [6, 6, 7], -8.382324261840997),
            (TZZ, [6, 6, 7], 318609143.02037615),
            (TZZ, [6, 6, 5], -318695862.0514664),
            (VX, [7, 6, 7], -2.8592048178398004),
        ],
    );
}

#[test]
fn alternating_flux_near_field_matches_golden_values() {
    let field = near_field_after_four_steps(SchemeKind::AlternatingFlux);
    assert_golden(
        &field,
        &[
            (VX, [6, 6, 6], -116.6774713988876),
            (VY, [6, 6, 6], 76.93773589385022),
            (VZ, [6, 6, 6], -387.0944825297206),
            (TZZ, [6, 6, 6], -237397807.66414768),
            (TXZ, [7, 6, 6], 28572079.18333594),
            (TXX, [5, 6, 6], -86614559.33669958),
            (TYZ, [6, 7, 6], 28793330.951727767),
            (TYZ, [6, 5, 6], -91629012.37321909),
            (TZZ, [6, 6, 7], 309332618.93241996),
            (VZ, [6, 6, 5], -1.6799686555705564),
            (VX, [7, 6, 7], -0.8242447563026175),
        ],
    );
}

#[test]
fn bounded_runs_stay_finite() {
    let grid = Grid::new([14, 14, 14], 100.0, [1, 2, 1]);
    for scheme in [SchemeKind::FiniteDifference, SchemeKind::AlternatingFlux] {
        let mut params = bounded_params(scheme, 40);
        params.ricker = Some(ricker_at([7, 7, 10]));
        params.output.peak_acceleration = true;
        params.output.displacement = true;
        let outputs = run(&grid, &params, None);
        for out in &outputs {
            assert!(out.wavefield.is_finite());
            assert!(out.displacement.as_ref().unwrap().iter().all(|v| v.is_finite()));
            let peaks = out.diagnostics.peaks.as_ref().unwrap();
            assert!(peaks.pgv.iter().all(|v| v.is_finite() && *v >= 0.0));
            assert!(peaks.pga.as_ref().unwrap().iter().all(|v| v.is_finite()));
        }
        let global = gather_wavefield(&grid, &outputs);
        assert!(global.iter().any(|&v| v != 0.0));
    }
}

#[test]
fn config_driven_run_takes_nt_steps_and_samples_on_cadence() {
    let config = Config::from_toml(
        r#"
        [grid]
        nx = 12
        ny = 12
        nz = 12
        dh = 100.0

        [ranks]
        pz = 2

        [time]
        dt = 0.005
        tmax = 0.0525

        [medium]
        vp = 3000.0
        vs = 1700.0
        rho = 2500.0

        [source.ricker]
        index = [6, 6, 9]
        amplitude = 1e15
        frequency = 40.0

        [output]
        it_skip = 4
        slice_z = 3
        free_surface_slice = true

        [[stations]]
        name = "TOP"
        index = [6, 6, 11]
    "#,
    )
    .unwrap();
    let params = SimulationParams::from_config(&config);
    assert_eq!(params.nt, 10);

    let grid = config.grid();
    let outputs = run_ranks(&grid, &params, None, homogeneous).unwrap();
    assert!(outputs.iter().all(|out| out.steps == 10));

    let (bottom, top) = (&outputs[0].diagnostics, &outputs[1].diagnostics);
    let frames = |kind: SliceKind, out: &seismic_wave_propagator::diagnostics::DiagnosticsOutput| {
        out.slices
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.it)
            .collect::<Vec<_>>()
    };
    let z3 = SliceKind::Volume { axis: 2, index: 3 };
    assert_eq!(frames(z3, bottom), vec![0, 4, 8]);
    assert!(frames(z3, top).is_empty());
    assert_eq!(frames(SliceKind::FreeSurface, top), vec![0, 4, 8]);
    assert!(frames(SliceKind::FreeSurface, bottom).is_empty());

    assert!(bottom.stations.is_empty());
    assert_eq!(top.stations[0].name, "TOP");
    assert_eq!(top.stations[0].samples.nrows(), 10);
    assert!(top.stations[0].samples.iter().any(|&v| v != 0.0));
}

#[test]
fn station_records_match_the_final_field() {
    let mut params = SimulationParams::new(0.005, 4, SchemeKind::AlternatingFlux);
    params.ricker = Some(ricker_at([4, 4, 4]));
    params.stations = vec![StationConfig {
        name: "S".into(),
        index: [5, 4, 4],
    }];
    params.output = OutputConfig {
        pgv: false,
        ..OutputConfig::default()
    };
    let grid = Grid::new([10, 10, 10], 100.0, [2, 1, 1]);
    let outputs = run(&grid, &params, None);
    let global = gather_wavefield(&grid, &outputs);

    let record = outputs
        .iter()
        .flat_map(|out| out.diagnostics.stations.iter())
        .next()
        .unwrap();
    for c in 0..9 {
        assert_eq!(record.samples[[3, c]], global[[c, 5, 4, 4]]);
    }
}

#[test]
fn failing_rank_aborts_the_run() {
    let grid = Grid::new([12, 12, 12], 100.0, [2, 2, 1]);
    let params = SimulationParams::new(0.005, 10, SchemeKind::FiniteDifference);
    let err = run_ranks(&grid, &params, None, |sub| {
        if sub.rank == 3 {
            Err(PropagationError::Resource("velocity model unreadable".into()))
        } else {
            homogeneous(sub)
        }
    })
    .unwrap_err();
    assert!(matches!(err, PropagationError::Resource(_)));
}

#[test]
fn panicking_rank_is_reported() {
    let grid = Grid::new([12, 12, 12], 100.0, [2, 1, 1]);
    let params = SimulationParams::new(0.005, 10, SchemeKind::FiniteDifference);
    let err = run_ranks(&grid, &params, None, |sub| {
        if sub.rank == 1 {
            panic!("medium builder blew up");
        }
        homogeneous(sub)
    })
    .unwrap_err();
    assert!(matches!(err, PropagationError::RankPanicked { rank: 1 }));
}

#[test]
fn short_source_series_is_rejected() {
    let grid = Grid::new([12, 12, 12], 100.0, [1, 1, 1]);
    let params = SimulationParams::new(0.005, 10, SchemeKind::FiniteDifference);
    let data = MultiSourceData {
        points: vec![SourcePoint {
            index: [6, 6, 6],
            tensor: [0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            rate: vec![1.0; 3],
        }],
    };
    let err = run_ranks(&grid, &params, Some(&data), homogeneous).unwrap_err();
    assert!(matches!(err, PropagationError::Resource(_)));
}
