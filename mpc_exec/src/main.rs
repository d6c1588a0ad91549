//! Main MPC executable entry point.
//! 
//! # Architecture
//! 
//! The executable reads simulator events line by line, either from stdin or from a replay file
//! given as the only argument, and writes one response line to stdout for each event that needs
//! one:
//! 
//!     - Telemetry events are processed by `MpcCtrl` and answered with a steering command. If the
//!       cycle is rejected the previous demands are sent again.
//!     - Events without data are answered with the manual mode message.
//!     - Events which cannot be parsed skip a cycle and are answered with the held command.
//!     - Any other event is ignored.
//! 
//! Logs are written to stderr and the session log file so that stdout only carries responses.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::thread;
use std::time::{Duration, Instant};
use color_eyre::{Report, eyre::{WrapErr, eyre}};

// Internal
use comms_if::sim::{SimEvent, SteerCmd, MANUAL_MSG};
use mpc_lib::mpc_ctrl::MpcCtrl;
use params::MpcExecParams;
use util::{
    module::State,
    logger::{logger_init, LevelFilter},
    session::Session,
    archive::Archived
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "mpc_exec", 
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: MpcExecParams = util::params::load(
        "mpc_exec.toml"
    ).wrap_err("Could not load exec params")?;
    exec_params.validate().wrap_err("Invalid exec params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    let mut mpc_ctrl: MpcCtrl = MpcCtrl::default();
    mpc_ctrl.init("mpc_ctrl.toml", &session)
        .wrap_err("Failed to initialise MpcCtrl")?;

    info!("MpcCtrl init complete");

    // ---- INITIALISE EVENT SOURCE ----

    let args: Vec<String> = env::args().collect();
    let source: Box<dyn BufRead> = match args.len() {
        1 => {
            info!("Reading events from stdin");
            Box::new(BufReader::new(io::stdin()))
        },
        2 => {
            info!("Replaying events from {}", args[1]);
            Box::new(BufReader::new(
                File::open(&args[1])
                    .wrap_err_with(|| format!("Could not open the replay file {}", args[1]))?
            ))
        },
        _ => return Err(eyre!(
            "Expected at most one argument (the replay file), found {}", 
            args.len() - 1
        ))
    };

    let stdout = io::stdout();
    let mut sink = stdout.lock();

    let cycle_period = Duration::from_secs_f64(exec_params.cycle_period_s);
    let latency = Duration::from_millis(exec_params.artificial_latency_ms);

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    for line in source.lines() {
        let line = line.wrap_err("Failed to read an event")?;

        // Get cycle start time
        let cycle_start_instant = Instant::now();

        let response = match SimEvent::parse(&line) {
            Ok(Some(SimEvent::Telemetry(telem))) => {
                let cmd = match mpc_ctrl.proc(&telem) {
                    Ok((cmd, report)) => {
                        debug!(
                            "Cycle {}: steer {:.4}, throttle {:.4}, {:?} in {} iterations",
                            report.cycle,
                            cmd.steering_angle,
                            cmd.throttle,
                            report.solve_status,
                            report.iterations
                        );
                        cmd
                    },
                    // Rejection is logged by MpcCtrl, hold the previous demands
                    Err(_) => mpc_ctrl.held_cmd()
                };
                write_archives(&mut mpc_ctrl);

                Some(encode(&cmd)?)
            },
            Ok(Some(SimEvent::Manual)) => Some(String::from(MANUAL_MSG)),
            Ok(Some(SimEvent::Unhandled(name))) => {
                debug!("Ignoring {} event", name);
                None
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Could not parse event: {}", e);
                let cmd = mpc_ctrl.skip_cycle();
                write_archives(&mut mpc_ctrl);

                Some(encode(&cmd)?)
            }
        };

        let response = match response {
            Some(r) => r,
            None => continue
        };

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        if cycle_dur > cycle_period {
            warn!(
                "Cycle overran by {:.06} s", 
                cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
            );
        }

        // ---- SEND RESPONSE ----

        if latency > Duration::from_secs(0) {
            thread::sleep(latency);
        }

        writeln!(sink, "{}", response).wrap_err("Failed to write the response")?;
        sink.flush().wrap_err("Failed to flush the response")?;
    }

    // ---- SHUTDOWN ----

    info!("End of execution");

    Ok(())
}

/// Write the archives of the controller, failures are only logged.
fn write_archives(mpc_ctrl: &mut MpcCtrl) {
    match mpc_ctrl.write() {
        Ok(_) => (),
        Err(e) => warn!("Could not write MpcCtrl archives: {}", e)
    };
}

/// Encode a steering command into its event message.
fn encode(cmd: &SteerCmd) -> Result<String, Report> {
    cmd.to_event_msg().wrap_err("Failed to encode the steering command")
}
