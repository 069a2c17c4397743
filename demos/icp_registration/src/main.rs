use argh::FromArgs;
use std::path::PathBuf;
use std::time::Instant;

use kornia_3d::io::{read_point_cloud, ReadOptions};
use kornia_3d::transforms::Transform;
use kornia_3d::Scalar;
use kornia_icp::backend::{CpuBackend, CpuConfig, DeviceBackend, DeviceConfig, MemoryPool};
use kornia_icp::{registration_icp, ConvergenceCriteria, RegistrationResult, TransformationEstimation};

#[derive(FromArgs)]
/// Example of ICP registration on the CPU and on the accelerator backend
struct Args {
    /// path to the source point cloud
    #[argh(option)]
    source_path: PathBuf,

    /// path to the target point cloud
    #[argh(option)]
    target_path: PathBuf,

    /// maximum correspondence distance
    #[argh(option, default = "0.02")]
    threshold: f64,

    /// maximum number of iterations
    #[argh(option, default = "30")]
    max_iteration: usize,

    /// estimation method: point-to-plane or point-to-point
    #[argh(option, default = "TransformationEstimation::PointToPlane")]
    method: TransformationEstimation,

    /// number of worker threads, one per core by default
    #[argh(option)]
    workers: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let options = ReadOptions::default();

    let source_cloud = read_point_cloud::<f64>(&args.source_path, &options)?;
    println!("Source cloud: #{} points", source_cloud.len());

    let target_cloud = read_point_cloud::<f64>(&args.target_path, &options)?;
    println!(
        "Target cloud: #{} points, normals: {}",
        target_cloud.len(),
        target_cloud.has_normals()
    );

    // NOTE: ICP needs a good initial guess for the transformation
    let init = Transform::new(
        [
            [0.862, 0.011, -0.507],
            [-0.139, 0.967, -0.215],
            [0.487, 0.255, 0.835],
        ],
        [0.5, 0.7, -1.4],
    );

    let criteria = ConvergenceCriteria::default().with_max_iteration(args.max_iteration);

    let mut cpu_config = CpuConfig::default();
    let mut device_config = DeviceConfig::default();
    if let Some(workers) = args.workers {
        cpu_config = cpu_config.with_num_threads(workers);
        device_config = device_config.with_num_workers(workers);
    }

    // the backends share one memory pool
    let memory = MemoryPool::unbounded();

    let cpu = CpuBackend::<f64>::with_config(cpu_config, memory.clone())?;
    let now = Instant::now();
    let result = registration_icp(
        &source_cloud,
        &target_cloud,
        args.threshold,
        &init,
        &args.method,
        &criteria,
        &cpu,
    )?;
    print_result("cpu (f64)", &result, now.elapsed());

    let device = DeviceBackend::<f32>::new(device_config, memory.clone())?;
    let (source_f32, target_f32) = (source_cloud.cast::<f32>(), target_cloud.cast::<f32>());
    let now = Instant::now();
    let result = registration_icp(
        &source_f32,
        &target_f32,
        args.threshold as f32,
        &init.cast::<f32>(),
        &args.method,
        &criteria,
        &device,
    )?;
    print_result("accelerator (f32)", &result, now.elapsed());

    println!("Peak pool usage: {} bytes", memory.peak());

    Ok(())
}

fn print_result<T: Scalar>(
    name: &str,
    result: &RegistrationResult<T>,
    elapsed: std::time::Duration,
) {
    println!("ICP registration on {name}:");
    println!("  transformation:");
    for row in result.transformation.to_matrix() {
        println!(
            "    [{:>10.6}, {:>10.6}, {:>10.6}, {:>10.6}]",
            row[0], row[1], row[2], row[3]
        );
    }
    println!("  fitness: {}", result.fitness);
    println!("  inlier rmse: {}", result.inlier_rmse);
    println!(
        "  termination: {:?} after {} iterations",
        result.termination, result.num_iterations
    );
    println!("  elapsed: {:?}", elapsed);
}
