use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray as nd;
use odestep::{
    Action, BulirschStoer, DormandPrince54, EventHandler, Integrator, StepSizeControl, System,
};

/// Two-body problem (6-state)
struct TwoBody {
    mu: f64,
}

impl System for TwoBody {
    type Float = f64;

    fn dimension(&self) -> usize {
        6
    }

    fn system(&self, _t: f64, y: nd::ArrayView1<f64>, mut dydt: nd::ArrayViewMut1<f64>) {
        let r = (y[0] * y[0] + y[1] * y[1] + y[2] * y[2]).sqrt();
        let mu_r3 = self.mu / (r * r * r);

        dydt[0] = y[3];
        dydt[1] = y[4];
        dydt[2] = y[5];
        dydt[3] = -mu_r3 * y[0];
        dydt[4] = -mu_r3 * y[1];
        dydt[5] = -mu_r3 * y[2];
    }
}

/// Ascending node crossing, `z = 0` with `z` increasing.
struct NodeCrossing;

impl EventHandler<f64> for NodeCrossing {
    fn g(&mut self, _t: f64, y: nd::ArrayView1<f64>) -> f64 {
        y[2]
    }

    fn event_occurred(&mut self, _t: f64, _y: nd::ArrayView1<f64>, _increasing: bool) -> Action {
        Action::Continue
    }
}

fn orbit() -> (TwoBody, nd::Array1<f64>, f64) {
    let mu: f64 = 398600.4418;
    let r0: f64 = 6878.0;
    let v0 = (mu / r0).sqrt();
    let inclination: f64 = 0.9;
    let y0 = nd::array![
        r0,
        0.0,
        0.0,
        0.0,
        v0 * inclination.cos(),
        v0 * inclination.sin()
    ];
    let period = 2.0 * std::f64::consts::PI * (r0.powi(3) / mu).sqrt();
    (TwoBody { mu }, y0, period)
}

fn bench_dormand_prince_orbit(c: &mut Criterion) {
    let (system, y0, period) = orbit();
    let mut y = nd::Array1::zeros(6);

    c.bench_function("dormand_prince_orbit_1period", |b| {
        b.iter(|| {
            let mut integrator = Integrator::new(
                DormandPrince54::default(),
                StepSizeControl::new(1e-3, 600., 1e-9, 1e-9),
            );
            integrator
                .integrate_system(&system, 0., black_box(y0.view()), period, y.view_mut())
                .unwrap()
        })
    });
}

fn bench_bulirsch_stoer_orbit(c: &mut Criterion) {
    let (system, y0, period) = orbit();
    let mut y = nd::Array1::zeros(6);

    c.bench_function("bulirsch_stoer_orbit_1period", |b| {
        b.iter(|| {
            let mut integrator = Integrator::new(
                BulirschStoer::default().with_target_num_iterations(5),
                StepSizeControl::new(1e-3, 600., 1e-9, 1e-9),
            );
            integrator
                .integrate_system(&system, 0., black_box(y0.view()), period, y.view_mut())
                .unwrap()
        })
    });
}

fn bench_orbit_with_events(c: &mut Criterion) {
    let (system, y0, period) = orbit();
    let mut y = nd::Array1::zeros(6);

    c.bench_function("dormand_prince_orbit_node_events", |b| {
        b.iter(|| {
            let mut integrator = Integrator::new(
                DormandPrince54::default(),
                StepSizeControl::new(1e-3, 600., 1e-9, 1e-9),
            );
            integrator.add_event_handler(NodeCrossing, 60., 1e-6, 100);
            integrator
                .integrate_system(
                    &system,
                    0.,
                    black_box(y0.view()),
                    3. * period,
                    y.view_mut(),
                )
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_dormand_prince_orbit,
    bench_bulirsch_stoer_orbit,
    bench_orbit_with_events
);
criterion_main!(benches);
