use std::sync::Arc;

use pasaje::engine::Engine;
use pasaje::entities::Coordinates;
use pasaje::simulation::Simulation;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_drivers_never_share_a_ride() {
    let engine = Arc::new(Engine::in_memory().unwrap());
    let origin = Coordinates::new(-12.0464, -77.0428);
    let destination = Coordinates::new(-12.1211, -77.0297);

    let simulation = Simulation::new(engine, origin, destination, 24)
        .await
        .unwrap();
    let report = simulation.run(5, 20000).await.unwrap();

    assert_eq!(report.rides, 5);
    assert_eq!(report.accepted, 5);
    assert_eq!(report.lost, 5 * 23);
    assert_eq!(report.failed, 0);
    assert_eq!(report.double_assigned, 0);
}
