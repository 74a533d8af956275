use clap::Parser;
use core::cell::RefCell;
use embassy_executor::Executor;
use embassy_time::{Duration, Instant, Ticker};
use rv2_core::mk_static;
use rv2_core::utils::connection::{
    bus::{BusConfig, MessageBus},
    link::LinkSupervisor,
};
use rv2_core::utils::context::{Calibration, Context};
use rv2_core::utils::controllers::{self, ArmController, TickOutcome};
use static_cell::StaticCell;
use std::net::SocketAddr;
use tracing::{error, info};

mod link;
mod sim;

use link::TcpLink;
use sim::SimI2c;

#[derive(Parser, Debug, Clone)]
#[clap(version = "1.0")]
struct Opts
{
    /// address the simulated serial port listens on
    #[clap(long, default_value = "127.0.0.1:7878")]
    listen: SocketAddr,
    /// control loop period in milliseconds
    #[clap(long, default_value_t = 50)]
    tick_ms: u64,
    /// checkup heartbeat period in milliseconds
    #[clap(long, default_value_t = 1000)]
    heartbeat_ms: u64,
    /// make the encoder of this actuator stop answering
    #[clap(long)]
    faulty_sensor: Option<usize>,
}

#[embassy_executor::task]
async fn board_task(opts: Opts) {
    let calibration = Calibration::default();
    let i2c_bus = mk_static!(
        RefCell<SimI2c>,
        RefCell::new(SimI2c::new(
            calibration.actuator_resting_pos,
            calibration.actuator_zero_pos,
            opts.faulty_sensor,
        ))
    );
    let mut ctx = Context::new(calibration);
    let mut arm = ArmController::new(i2c_bus, &ctx, None, None);

    let config = BusConfig {
        heartbeat_interval: Duration::from_millis(opts.heartbeat_ms),
        ..BusConfig::default()
    };
    let mut bus: MessageBus<TcpLink, Context> = MessageBus::new(TcpLink::new(opts.listen), Some(config));
    if let Err(e) = controllers::register(&mut bus) {
        error!("subscription failed: {}", e);
        return;
    }

    arm.boot(&mut ctx, bus.publisher());
    ctx.motion.set_target(ctx.calibration.actuator_home_pos);

    let mut supervisor = LinkSupervisor::new(None);
    let mut ticker = Ticker::every(Duration::from_millis(opts.tick_ms));
    info!(tick_ms = opts.tick_ms, "board running");
    loop {
        let now = Instant::now();
        // while the link is down the bus idles and the arm keeps being serviced
        supervisor.poll(bus.stream_mut(), now);
        bus.poll(&mut ctx, now);
        match arm.service(&mut ctx, bus.publisher(), now) {
            TickOutcome::Finished => info!(current = ?ctx.motion.current_rotation, "target reached"),
            TickOutcome::NextWaypoint => info!(queued = ctx.motion.queued(), "next waypoint"),
            _ => {}
        }
        ticker.next().await;
    }
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opts: Opts = Opts::parse();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        if let Err(e) = spawner.spawn(board_task(opts)) {
            error!("failed to spawn board task: {:?}", e);
        }
    });
}
