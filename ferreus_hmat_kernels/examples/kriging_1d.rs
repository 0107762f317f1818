use faer::Mat;
use ferreus_hmat::{
    progress::{closure_sink, ProgressMsg},
    HMatrixFactory, HMatrixParameters, HMatrixSettings,
};
use ferreus_hmat_kernels::{models::MaternModel, models::MaternSmoothness, CovarianceAssemblyFunction};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Observations of sin(2 pi x) on a regular grid in [0, 1]
    let num_points = 2000usize;
    let points = Mat::from_fn(num_points, 1, |i, _| i as f64 / (num_points - 1) as f64);
    let values = Mat::from_fn(num_points, 1, |i, _| (2.0 * std::f64::consts::PI * points[(i, 0)]).sin());

    // Matern 5/2 covariance with a length scale of 0.05
    let model = MaternModel::new(vec![0.05], 1.0, MaternSmoothness::FiveHalves)?;
    let covariance = CovarianceAssemblyFunction::new(&model, points.as_ref())?;

    // Print assembly and factorization progress
    let (sink, listener) = closure_sink(64, |msg| match msg {
        ProgressMsg::Assembly {
            compressed_size,
            uncompressed_size,
        } => println!("assembled: {compressed_size} / {uncompressed_size} values stored"),
        ProgressMsg::FactorizationAttempt {
            iter,
            regularization,
            success,
        } => println!("factorization {iter}: lambda={regularization:e}, success={success}"),
        _ => {}
    });

    let settings = HMatrixSettings {
        max_leaf_size: 64,
        regularization_epsilon: 1e-10,
        ..Default::default()
    };
    let factory = HMatrixFactory::builder()
        .settings(settings)
        .progress_callback(sink)
        .build();
    let parameters = HMatrixParameters::builder()
        .epsilon(1e-8)
        .compression_method("AcaPlus")
        .build();

    // Assemble the lower half of the covariance matrix and factorize it
    let mut hmat = factory.build(points.as_ref(), 1, &parameters)?;
    hmat.assemble(&covariance, &parameters, 'L')?;
    hmat.factorize("LLt")?;

    // Kriging weights
    let weights = hmat.solve(values.as_ref(), false)?;

    // Predict midway between the first two observations
    let target = 0.5 / (num_points - 1) as f64;
    let prediction: f64 = (0..num_points)
        .map(|i| model.rho((target - points[(i, 0)]).abs() / 0.05) * weights[(i, 0)])
        .sum();
    println!(
        "prediction at {target:.6}: {prediction:.6} (exact {:.6})",
        (2.0 * std::f64::consts::PI * target).sin()
    );
    println!("{hmat}");

    drop(hmat);
    drop(factory);
    listener.join().ok();

    Ok(())
}
