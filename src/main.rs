use std::io::{self, Write};
use std::process::ExitCode;

use dynamixel_probe::cli::{log_filter, Args};
use dynamixel_probe::probe::{connect, PollOutcome, ServoProbe};
use dynamixel_probe::FramedSerialDriver;
use structopt::StructOpt;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(log_filter())
        .init();

    let args = Args::from_args();
    let config = args.config();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stderr = io::stderr();
    let mut err = stderr.lock();

    // best effort, the probe itself reports write failures
    let _ = writeln!(
        err,
        "servo id:{}, goal position:{}",
        args.servo_id, args.goal_position
    );

    let driver = match connect(&config, FramedSerialDriver::open, &mut err) {
        Ok(driver) => driver,
        Err(_) => return ExitCode::from(1),
    };

    match ServoProbe::new(&config, args.servo_id, args.goal_position)
        .run(driver, &mut out, &mut err)
        .await
    {
        Ok(PollOutcome::Settled { .. }) => ExitCode::SUCCESS,
        Ok(PollOutcome::GaveUp { polls, position }) => {
            let _ = writeln!(
                err,
                "Servo did not reach {} within {} reads, last position {}",
                args.goal_position, polls, position
            );
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "probe aborted");
            ExitCode::from(1)
        }
    }
}
