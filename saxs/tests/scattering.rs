#![allow(missing_docs)]

//! End-to-end scenarios: molecule → histograms → Debye transform → profile →
//! fit, across the builder variants.

use float_cmp::assert_approx_eq;
use lin_alg::f64::Vec3;
use rand::Rng;
use rand_pcg::Pcg64;
use saxs::config::{EngineConfig, FitFlags, ManagerChoice};
use saxs::data::{Atom, Body, Molecule, Water};
use saxs::fitter::{LinearLeastSquares, SmartFitter};
use saxs::form_factor::{form_factor, FormFactorType};
use saxs::hist::composite::{CompositeHistogram, CompositeHistogramEnum, FitParams};
use saxs::hist::exact::exact_debye_transform;
use saxs::hist::manager::{HistogramManager, HistogramManagerEnum};
use saxs::hist::partial::PartialHistogramManager;
use saxs::hist::simple::SimpleHistogramManager;
use saxs::profile::DataCurve;

fn gaussian(rng: &mut Pcg64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-12);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

// snapping to 1/64 Å keeps every coordinate (and every translated copy)
// exactly representable in f32, so cached and recomputed histograms agree
// bit for bit
fn snap(x: f64) -> f64 {
    (x * 64.0).round() / 64.0
}

/// A deterministic globular atom cloud standing in for a protein; structure
/// file readers are outside the engine.
fn pseudo_protein(n: usize, radius: f64, seed: u128) -> Vec<Atom> {
    let mut rng = Pcg64::new(seed, 0xa02bdbf7bb3c0a7);
    let mut atoms = Vec::with_capacity(n);
    while atoms.len() < n {
        let p = Vec3::new(
            snap(rng.gen::<f64>().mul_add(2.0, -1.0) * radius),
            snap(rng.gen::<f64>().mul_add(2.0, -1.0) * radius),
            snap(rng.gen::<f64>().mul_add(2.0, -1.0) * radius),
        );
        if p.magnitude() > radius {
            continue;
        }
        let (weight, t) = match atoms.len() % 5 {
            0 | 1 => (6.0, FormFactorType::C),
            2 => (7.0, FormFactorType::CH),
            3 => (7.0, FormFactorType::N),
            _ => (8.0, FormFactorType::O),
        };
        atoms.push(Atom::new(p, weight, t));
    }
    atoms
}

fn shell_waters(n: usize, radius: f64, seed: u128) -> Vec<Water> {
    let mut rng = Pcg64::new(seed, 0x5851f42d4c957f2d);
    (0..n)
        .map(|_| {
            let v = Vec3::new(
                gaussian(&mut rng),
                gaussian(&mut rng),
                gaussian(&mut rng),
            );
            let p = v * (radius / v.magnitude().max(1e-9));
            Water::new(Vec3::new(snap(p.x), snap(p.y), snap(p.z)))
        })
        .collect()
}

// S1: a single carbon at the origin, weight 6, no hydration.
#[test]
fn s1_single_carbon() {
    let mut molecule = Molecule::new(vec![Body::new(
        0,
        vec![Atom::new(Vec3::new_zero(), 6.0, FormFactorType::C)],
    )])
    .unwrap();

    // histogram: all mass in bin 0
    let mut plain = SimpleHistogramManager::new(&EngineConfig::default());
    let histogram = plain.calculate(&mut molecule).unwrap();
    assert_approx_eq!(f64, histogram.total()[0], 36.0, epsilon = 1e-9);
    assert!(histogram.total().iter().skip(1).all(|&v| v == 0.0));

    // intensity: 36·F_C(q)²
    let config = EngineConfig {
        histogram_manager: ManagerChoice::FFAvg,
        ..EngineConfig::default()
    };
    let mut manager = HistogramManagerEnum::from_config(&config).unwrap();
    let composite = manager.calculate_all(&mut molecule).unwrap();
    let CompositeHistogramEnum::FormFactor(mut ff) = composite else {
        panic!("the FFAvg manager produces form-factor composites");
    };
    let profiles = ff.profiles().clone();
    let carbon = form_factor(FormFactorType::C);
    for (&q, &i) in profiles.q.iter().zip(&profiles.aa) {
        let expected = 36.0 * carbon.evaluate(q).powi(2);
        assert!(
            (i - expected).abs() <= 1e-8 * expected,
            "q = {q}: {i} vs {expected}"
        );
    }
}

// S2: two carbons 10 Å apart.
#[test]
fn s2_two_carbons_at_ten_angstrom() {
    let mut molecule = Molecule::new(vec![Body::new(
        0,
        vec![
            Atom::new(Vec3::new_zero(), 6.0, FormFactorType::C),
            Atom::new(Vec3::new(10.0, 0.0, 0.0), 6.0, FormFactorType::C),
        ],
    )])
    .unwrap();

    let mut plain = SimpleHistogramManager::new(&EngineConfig::default());
    let histogram = plain.calculate(&mut molecule).unwrap();
    assert_approx_eq!(f64, histogram.total()[0], 72.0, epsilon = 1e-9);
    assert_approx_eq!(f64, histogram.total()[80], 72.0, epsilon = 1e-9);

    let config = EngineConfig {
        histogram_manager: ManagerChoice::FFAvg,
        ..EngineConfig::default()
    };
    let mut manager = HistogramManagerEnum::from_config(&config).unwrap();
    let CompositeHistogramEnum::FormFactor(mut ff) =
        manager.calculate_all(&mut molecule).unwrap()
    else {
        panic!()
    };
    // I(0) = 144·F_C(0)²; at the smallest q both factors are ~1
    assert_approx_eq!(f64, ff.profiles().aa[0], 144.0, epsilon = 1e-3);
}

// S3: a protein-sized cloud, plain manager, no hydration.
#[test]
fn s3_profile_decays_and_managers_agree() {
    let atoms = pseudo_protein(600, 18.0, 0x2e9e);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
    let config = EngineConfig::default();

    let mut plain = SimpleHistogramManager::new(&config);
    let profile = plain.calculate(&mut molecule).unwrap().debye_transform();
    let i = profile.intensity();
    assert!(i[0] > 0.0);
    assert!(
        i[i.len() - 1] < i[0] / 10.0,
        "I(q_max) = {} vs I(q_min) = {}",
        i[i.len() - 1],
        i[0]
    );

    // the partial manager must reproduce the plain histograms to 1e-9
    let CompositeHistogramEnum::Plain(from_plain) = plain.calculate_all(&mut molecule).unwrap()
    else {
        panic!()
    };
    let CompositeHistogramEnum::Plain(from_partial) = PartialHistogramManager::new(&config)
        .calculate_all(&mut molecule)
        .unwrap()
    else {
        panic!()
    };
    for (a, b) in from_plain.aa().iter().zip(from_partial.aa()) {
        assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{a} vs {b}");
    }
}

// S4: fit a hydrated molecule against its own noisy curve.
#[test]
fn s4_hydration_fit_recovers_cw() {
    let atoms = pseudo_protein(150, 12.0, 0xf17);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
    molecule.set_hydration(shell_waters(60, 16.0, 0x33));

    let config = EngineConfig::default();
    let mut manager = PartialHistogramManager::new(&config);
    let mut model = manager.calculate_all(&mut molecule).unwrap();

    // simulate a measured curve at cw = 1 with 5% noise
    let truth = model.profile();
    let mut rng = Pcg64::new(0xdeadbeef, 0x1234567);
    let points: Vec<(f64, f64, f64)> = truth
        .evaluate()
        .into_iter()
        .map(|(q, i)| {
            let sigma = 0.05 * i.abs().max(1e-12);
            (q, sigma.mul_add(gaussian(&mut rng), i), sigma)
        })
        .collect();
    let data = DataCurve::from_points(&points).unwrap();

    let flags = FitFlags {
        hydration: true,
        excluded_volume: false,
        atomic_debye_waller: false,
        exv_debye_waller: false,
    };
    let result = SmartFitter::new(data, &mut model, flags).fit().unwrap();

    let cw = result.parameter("cw").unwrap().value;
    assert!((0.9..=1.1).contains(&cw), "recovered cw = {cw}");
    let reduced = result.reduced_chi2();
    assert!((0.5..=2.0).contains(&reduced), "χ²/dof = {reduced}");
    assert!(
        (50..=500).contains(&result.calls),
        "{} evaluations",
        result.calls
    );
    assert!(!result.evaluated_points.is_empty());
}

// S5: move one body of a three-body split; the cache reuses everything that
// did not touch the moved body.
#[test]
fn s5_cache_hits_and_misses() {
    let atoms = pseudo_protein(120, 15.0, 0x5e5);
    let thirds: Vec<Vec<Atom>> = atoms.chunks(40).map(<[Atom]>::to_vec).collect();
    let bodies: Vec<Body> = thirds
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Body::new(i as u32, chunk))
        .collect();
    let mut molecule = Molecule::new(bodies).unwrap();

    let config = EngineConfig::default();
    let mut manager = PartialHistogramManager::new(&config);
    manager.calculate_all(&mut molecule).unwrap();

    molecule.translate_body(1, Vec3::new(5.0, 0.0, 0.0));
    manager.calculate_all(&mut molecule).unwrap();

    let report = manager.last_report();
    assert!(report.pair_hit(0, 2));
    assert!(report.self_hit(0));
    assert!(report.self_hit(1));
    assert!(report.self_hit(2));
    assert!(!report.pair_hit(0, 1));
    assert!(!report.pair_hit(1, 2));

    manager.verify_against_scratch(&molecule).unwrap();
}

// S6: the inner linear fit on a synthetic dataset.
#[test]
fn s6_linear_fit_on_synthetic_data() {
    let atoms = pseudo_protein(200, 14.0, 0x51f);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
    let mut plain = SimpleHistogramManager::new(&EngineConfig::default());
    let profile = plain.calculate(&mut molecule).unwrap().debye_transform();

    // normalize to I(q_min) = 1 so that scale and offset are commensurate
    let i0 = profile.intensity()[0];
    let model: Vec<f64> = profile.intensity().iter().map(|&i| i / i0).collect();

    let mut rng = Pcg64::new(0x600dcafe, 0xabcdef);
    let mut data = Vec::with_capacity(model.len());
    let mut errors = Vec::with_capacity(model.len());
    for &m in &model {
        let y = 2.0_f64.mul_add(m, 3.0);
        let sigma = 0.05 * y;
        data.push(sigma.mul_add(gaussian(&mut rng), y));
        errors.push(sigma);
    }

    let fit = LinearLeastSquares::with_errors(&data, &model, &errors)
        .unwrap()
        .fit()
        .unwrap();
    assert!((1.9..=2.1).contains(&fit.scale), "scale = {}", fit.scale);
    assert!((2.5..=3.5).contains(&fit.offset), "offset = {}", fit.offset);
    assert!(fit.q > 0.01, "Q = {}", fit.q);
    assert!(fit.converged);
}

// Property 1: bin-0 masses.
#[test]
fn bin_zero_mass_is_the_squared_weight_sum() {
    let atoms = pseudo_protein(50, 10.0, 0xb0);
    let expected_aa: f64 = atoms.iter().map(|a| a.weight * a.weight).sum();
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
    let waters = shell_waters(20, 14.0, 0xb1);
    let expected_ww: f64 = waters.iter().map(|w| w.weight * w.weight).sum();
    molecule.set_hydration(waters);

    let CompositeHistogramEnum::Plain(composite) =
        SimpleHistogramManager::new(&EngineConfig::default())
            .calculate_all(&mut molecule)
            .unwrap()
    else {
        panic!()
    };
    assert_approx_eq!(f64, composite.aa()[0], expected_aa, epsilon = 1e-6);
    assert_approx_eq!(f64, composite.ww()[0], expected_ww, epsilon = 1e-6);
}

// Property 3: cache correctness over an interleaved modification sequence.
#[test]
fn cache_survives_an_editing_sequence() {
    let atoms = pseudo_protein(90, 12.0, 0xcab);
    let thirds: Vec<Vec<Atom>> = atoms.chunks(30).map(<[Atom]>::to_vec).collect();
    let bodies: Vec<Body> = thirds
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Body::new(i as u32, chunk))
        .collect();
    let mut molecule = Molecule::new(bodies).unwrap();

    let mut manager = PartialHistogramManager::new(&EngineConfig::default());
    manager.calculate_all(&mut molecule).unwrap();
    manager.verify_against_scratch(&molecule).unwrap();

    molecule.translate_body(0, Vec3::new(2.5, 0.0, 0.0));
    manager.calculate_all(&mut molecule).unwrap();
    manager.verify_against_scratch(&molecule).unwrap();

    molecule.add_atoms(2, [Atom::new(Vec3::new(0.0, 6.25, 0.0), 7.0, FormFactorType::N)]);
    molecule.translate_body(1, Vec3::new(0.0, 0.0, -1.25));
    manager.calculate_all(&mut molecule).unwrap();
    manager.verify_against_scratch(&molecule).unwrap();

    molecule.set_hydration(shell_waters(15, 15.0, 0xcc));
    manager.calculate_all(&mut molecule).unwrap();
    manager.verify_against_scratch(&molecule).unwrap();
}

// Property 4: the Debye transform at q → 0.
#[test]
fn debye_zero_is_the_squared_total_weight() {
    let atoms = pseudo_protein(80, 10.0, 0xd0);
    let total: f64 = atoms.iter().map(|a| a.weight).sum();
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();

    let exact = exact_debye_transform(&molecule, &[1e-9]);
    assert_approx_eq!(f64, exact[0], total * total, epsilon = 1e-4 * total * total);

    let mut plain = SimpleHistogramManager::new(&EngineConfig::default());
    let profile = plain.calculate(&mut molecule).unwrap().debye_transform();
    assert!((profile.intensity()[0] - total * total).abs() < 1e-4 * total * total);
}

// Weighted bins remove the binning error: on a sparse molecule the histogram
// path reproduces the exact transform.
#[test]
fn weighted_bins_match_the_exact_transform() {
    let atoms = pseudo_protein(25, 9.0, 0xeb);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();

    let config = EngineConfig {
        weighted_bins: true,
        ..EngineConfig::default()
    };
    let mut plain = SimpleHistogramManager::new(&config);
    let profile = plain.calculate(&mut molecule).unwrap().debye_transform();
    let exact = exact_debye_transform(&molecule, profile.q());

    // the weighted centers cancel the first-order binning error; what
    // remains is the curvature term, far below the forward scattering
    let forward = exact[0];
    for ((&q, &i), &e) in profile.q().iter().zip(profile.intensity()).zip(&exact) {
        assert!(
            (i - e).abs() <= 2e-3 * forward,
            "q = {q}: histogram {i} vs exact {e}"
        );
    }
}

// Property 6: round trip. A model fitted against its own curve recovers the
// identity parameters.
#[test]
fn round_trip_self_fit() {
    let atoms = pseudo_protein(120, 12.0, 0x66);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
    molecule.set_hydration(shell_waters(40, 16.0, 0x67));

    let config = EngineConfig {
        histogram_manager: ManagerChoice::FFAvg,
        ..EngineConfig::default()
    };
    let mut manager = HistogramManagerEnum::from_config(&config).unwrap();
    let mut model = manager.calculate_all(&mut molecule).unwrap();

    let data = model.profile().as_curve().unwrap();
    let result = SmartFitter::new(data, &mut model, FitFlags::default())
        .fit()
        .unwrap();

    let cw = result.parameter("cw").unwrap().value;
    let cx = result.parameter("cx").unwrap().value;
    let scale = result.parameter("scale").unwrap().value;
    let offset = result.parameter("offset").unwrap().value;
    let i0 = result.curves.data[0].abs();

    assert!((cw - 1.0).abs() < 0.05, "cw = {cw}");
    assert!((cx - 1.0).abs() < 0.05, "cx = {cx}");
    assert!((scale - 1.0).abs() < 1e-2, "scale = {scale}");
    assert!(offset.abs() < 1e-4 * i0, "offset = {offset}");
    assert!(result.chi2 < 1e-9 * i0 * i0, "χ² = {}", result.chi2);
}

// Property 7: determinism across repeated builds.
#[test]
fn repeated_builds_are_bit_identical() {
    let atoms = pseudo_protein(300, 15.0, 0x77);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
    molecule.set_hydration(shell_waters(50, 19.0, 0x78));

    let config = EngineConfig {
        histogram_manager: ManagerChoice::FFAvg,
        ..EngineConfig::default()
    };

    let run = |molecule: &mut Molecule| {
        let mut manager = HistogramManagerEnum::from_config(&config).unwrap();
        let mut composite = manager.calculate_all(molecule).unwrap();
        composite.intensity(&FitParams::default())
    };

    let first = run(&mut molecule);
    let second = run(&mut molecule);
    assert_eq!(first, second);
}

// The grid-sampled excluded volume lowers the contrast relative to no
// excluded volume at all.
#[test]
fn grid_excluded_volume_reduces_forward_scattering() {
    let atoms = pseudo_protein(100, 10.0, 0x99);
    let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();

    let config = EngineConfig {
        histogram_manager: ManagerChoice::FFGrid,
        weighted_bins: true,
        ..EngineConfig::default()
    };
    let mut manager = HistogramManagerEnum::from_config(&config).unwrap();
    let mut composite = manager.calculate_all(&mut molecule).unwrap();

    let with_exv = composite.intensity(&FitParams::default());
    let without_exv = composite.intensity(&FitParams {
        cx: 0.0,
        ..FitParams::default()
    });

    assert!(with_exv[0] < without_exv[0]);
    assert!(with_exv[0] > 0.0);
}
