use ndarray::{Array2, Array3};
use rand::{rngs::StdRng, SeedableRng};
use spikegrad_runtime::{
    classification_accuracy, poisson_spike_train, ExpSynParams, LeakyParams, LifParams, Network,
    Readout, Runner, RuntimeError, Trainer, TrainerConfig, WeightInit,
};

fn network(init: WeightInit, readout_rest: f32) -> Network {
    let syn = ExpSynParams {
        g_max: init,
        ..Default::default()
    };
    Network::builder()
        .add_input("i", 3)
        .add_lif("r", 2, LifParams::default())
        .add_leaky("o", 1, LeakyParams::new(5.0, readout_rest).unwrap())
        .connect("i2r", "i", "r", syn.clone())
        .connect("r2o", "r", "o", syn)
        .output("o")
        .build()
        .unwrap()
}

#[test]
fn zero_weights_keep_readout_at_rest() {
    let net = network(WeightInit::Zeros, -0.5);
    let inputs = Array3::from_shape_fn((4, 10, 3), |(b, t, f)| ((b + t + f) % 2) as f32);

    let out = Runner::new(&net)
        .with_monitors(["r.spike", "r.V"])
        .unwrap()
        .run(inputs.view(), true)
        .unwrap();

    assert_eq!(out.output.dim(), (4, 10, 1));
    assert!(out.output.iter().all(|&v| v == -0.5));
    assert!(out.mon("r.spike").unwrap().iter().all(|&s| s == 0.0));
    assert!(out.mon("r.V").unwrap().iter().all(|&v| v == 0.0));
}

#[test]
fn runs_without_monitors_return_empty_map() {
    let net = network(WeightInit::KaimingNormal { scale: 20.0 }, 0.0);
    let inputs = poisson_spike_train(&mut StdRng::seed_from_u64(4), 2, 50, 3, 200.0, 0.1).unwrap();
    let out = Runner::new(&net).run(inputs.view(), true).unwrap();
    assert!(out.monitors.is_empty());
    assert_eq!(out.output.dim(), (2, 50, 1));
}

#[test]
fn repeated_rollouts_are_deterministic() {
    let net = network(WeightInit::KaimingNormal { scale: 20.0 }, 0.0);
    let inputs = poisson_spike_train(&mut StdRng::seed_from_u64(5), 3, 100, 3, 300.0, 0.1).unwrap();
    let mut runner = Runner::new(&net).with_monitors(["r.V", "i2r.g"]).unwrap();
    let a = runner.run(inputs.view(), true).unwrap();
    let b = runner.run(inputs.view(), true).unwrap();
    assert_eq!(a.output, b.output);
    assert_eq!(a.monitors, b.monitors);
}

#[test]
fn wrong_feature_size_fails_before_simulation() {
    let net = network(WeightInit::Zeros, 0.0);
    let inputs = Array3::<f32>::zeros((2, 5, 4));
    let err = Runner::new(&net).run(inputs.view(), true).unwrap_err();
    assert!(matches!(err, RuntimeError::ShapeMismatch { .. }));
}

#[test]
fn spike_readout_reports_output_spikes() {
    let syn = ExpSynParams {
        g_max: WeightInit::Constant { value: 20.0 },
        ..Default::default()
    };
    let net = Network::builder()
        .with_dt(1.0)
        .add_input("i", 1)
        .add_lif("o", 1, LifParams::default())
        .connect("i2o", "i", "o", syn)
        .output("o")
        .readout(Readout::Spike)
        .build()
        .unwrap();
    let inputs = Array3::from_elem((1, 3, 1), 1.0f32);
    let out = Runner::new(&net).run(inputs.view(), true).unwrap();
    assert!(out.output.iter().all(|&s| s == 1.0));
}

fn two_class_network() -> Network {
    Network::builder()
        .with_dt(1.0)
        .with_seed(7)
        .add_input("i", 3)
        .add_lif("r", 4, LifParams::default())
        .add_leaky("o", 2, LeakyParams::new(5.0, 0.0).unwrap())
        .connect(
            "i2r",
            "i",
            "r",
            ExpSynParams {
                g_max: WeightInit::KaimingNormal { scale: 20.0 },
                ..Default::default()
            },
        )
        .connect("r2r", "r", "r", ExpSynParams::default())
        .connect("r2o", "r", "o", ExpSynParams::default())
        .output("o")
        .build()
        .unwrap()
}

#[test]
fn training_pipeline_on_synthetic_data() {
    let mut rng = StdRng::seed_from_u64(42);
    let inputs = poisson_spike_train(&mut rng, 8, 60, 3, 100.0, 1.0).unwrap();
    let labels: Vec<usize> = (0..8).map(|b| b % 2).collect();

    let net = two_class_network();
    let before: Vec<(String, Array2<f32>)> = net
        .trainable_vars()
        .into_iter()
        .map(|(name, w)| (name, w.clone()))
        .collect();

    let mut trainer = Trainer::new(net.clone(), TrainerConfig::default()).unwrap();
    let losses = trainer.fit(inputs.view(), &labels, 3).unwrap();
    assert_eq!(losses.len(), 3);
    assert!(losses.iter().all(|l| l.is_finite() && *l >= 0.0));
    assert!(losses[0] > 0.0);

    let changed = before.iter().any(|(name, w)| {
        trainer
            .network()
            .trainable_vars()
            .into_iter()
            .any(|(n, trained)| n == *name && trained != w)
    });
    assert!(changed, "no weight moved after fitting");

    let mut again = Trainer::new(net, TrainerConfig::default()).unwrap();
    let replay = again.fit(inputs.view(), &labels, 3).unwrap();
    assert_eq!(losses, replay);
    assert_eq!(trainer.network().trainable_vars(), again.network().trainable_vars());

    let out = Runner::new(trainer.network()).run(inputs.view(), true).unwrap();
    let accuracy = classification_accuracy(out.output.view(), &labels).unwrap();
    assert!((0.0..=1.0).contains(&accuracy));
}
