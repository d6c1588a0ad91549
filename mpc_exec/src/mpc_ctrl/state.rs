//! Implementations for the MpcCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};
use nalgebra::Point2;
use serde::Serialize;

// Internal
use super::{
    latency, packager,
    to_vehicle_frame, Pose,
    Actuators, KinematicModel, MpcState,
    PanocOptimiser, Optimiser, SolveStatus,
    MpcCtrlError, Params, Polynomial, POLY_ORDER};
use comms_if::sim::{SteerCmd, Telemetry};
use util::{
    params,
    module::State,
    archive::{Archived, Archiver},
    session::{self, Session}};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// MPC control module state
pub struct MpcCtrl<O: Optimiser = PanocOptimiser> {
    params: Params,

    model: KinematicModel,

    optimiser: O,

    /// Normalised steering and throttle of the last command produced, sent
    /// again when a cycle is rejected
    held: (f64, f64),

    /// Number of cycles processed so far
    cycle: u64,

    report: StatusReport,
    arch_report: Archiver,
}

/// Status report for MpcCtrl processing.
///
/// Kept flat so that each field maps onto one archive column.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct StatusReport {
    /// Time since the start of the session
    pub time_s: f64,

    pub cycle: u64,

    /// False if the cycle was rejected and the held command was sent
    pub cycle_ok: bool,

    pub num_waypoints: usize,

    /// Cross-track error at the start of the cycle, before latency
    /// compensation
    pub cte0: f64,

    /// Heading error at the start of the cycle, before latency compensation
    pub epsi0: f64,

    /// Status of the solve, if one was run
    pub solve_status: Option<SolveStatus>,

    pub iterations: usize,

    pub cost: f64,

    pub solve_time_s: f64,

    /// Normalised steering demand sent this cycle
    pub steer_dem_norm: f64,

    /// Throttle demand sent this cycle
    pub throttle_dem: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for MpcCtrl<PanocOptimiser> {
    fn default() -> Self {
        Self::build(Params::default(), PanocOptimiser::new())
    }
}

impl MpcCtrl<PanocOptimiser> {
    /// Create a controller from a parameter set, using the PANOC optimiser.
    pub fn new(params: Params) -> Result<Self, MpcCtrlError> {
        Self::with_optimiser(params, PanocOptimiser::new())
    }
}

impl<O: Optimiser> MpcCtrl<O> {
    /// Create a controller using a specific optimiser.
    pub fn with_optimiser(params: Params, optimiser: O) -> Result<Self, MpcCtrlError> {
        params.validate()?;
        Ok(Self::build(params, optimiser))
    }

    fn build(params: Params, optimiser: O) -> Self {
        Self {
            model: KinematicModel::new(params.lf_m),
            params,
            optimiser,
            held: (0.0, 0.0),
            cycle: 0,
            report: StatusReport::default(),
            arch_report: Archiver::default(),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The command to send when a cycle is rejected: the last actuator
    /// demands with no trajectories.
    pub fn held_cmd(&self) -> SteerCmd {
        SteerCmd::hold(self.held.0, self.held.1)
    }

    /// Mark the current cycle as skipped without running the pipeline, for
    /// example because the incoming event could not be parsed.
    ///
    /// Returns the held command.
    pub fn skip_cycle(&mut self) -> SteerCmd {
        self.begin_cycle();
        self.reject_cycle();
        self.held_cmd()
    }

    fn begin_cycle(&mut self) {
        self.cycle += 1;
        self.report = StatusReport {
            time_s: session::get_elapsed_seconds(),
            cycle: self.cycle,
            ..Default::default()
        };
    }

    fn reject_cycle(&mut self) {
        self.optimiser.reset();
        self.report.cycle_ok = false;
        self.report.steer_dem_norm = self.held.0;
        self.report.throttle_dem = self.held.1;
    }

    /// Run the full pipeline on one telemetry sample.
    fn run_pipeline(&mut self, telem: &Telemetry) -> Result<SteerCmd, MpcCtrlError> {
        let waypoints = validate_telemetry(telem)?;
        self.report.num_waypoints = waypoints.len();

        // Move the waypoints into the vehicle frame and fit the reference
        let pose = Pose::new(telem.x, telem.y, telem.psi);
        let local = to_vehicle_frame(&pose, &waypoints);
        let poly = Polynomial::fit(&local, POLY_ORDER)?;

        // Predict where the vehicle will be once the command takes effect
        let measured = MpcState::at_origin(telem.speed, &poly);
        self.report.cte0 = measured.cte;
        self.report.epsi0 = measured.epsi;

        let applied = Actuators::new(telem.steering_angle, telem.throttle);
        let init = latency::compensate(
            &self.model,
            &measured,
            &applied,
            &poly,
            self.params.actuation_delay_s
        );

        debug!(
            "Fit {:?} over {} waypoints, compensated state {:?}",
            poly.coeffs(), waypoints.len(), init
        );

        let solution = self.optimiser.solve(&init, &poly, &self.params)?;

        self.report.solve_status = Some(solution.status);
        self.report.iterations = solution.iterations;
        self.report.cost = solution.cost;
        self.report.solve_time_s = solution.solve_time_s;

        if !solution.is_finite() {
            return Err(MpcCtrlError::NonFiniteCommand)
        }
        if solution.status != SolveStatus::Converged {
            warn!(
                "Solve did not converge ({:?} after {} iterations), using best iterate",
                solution.status, solution.iterations
            );
        }

        let cmd = packager::package(&solution, &poly, &self.params);

        if !cmd.steering_angle.is_finite() || !cmd.throttle.is_finite() {
            return Err(MpcCtrlError::NonFiniteCommand)
        }

        Ok(cmd)
    }
}

impl<O: Optimiser> State for MpcCtrl<O> {
    type InitData = &'static str;
    type InitError = MpcCtrlError;

    type InputData = Telemetry;
    type OutputData = SteerCmd;
    type StatusReport = StatusReport;
    type ProcError = MpcCtrlError;

    /// Initialise the MpcCtrl module.
    ///
    /// Expected init data is the path to the parameter file.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>
    {
        let params: Params = params::load(init_data)?;
        params.validate()?;

        self.model = KinematicModel::new(params.lf_m);
        self.params = params;
        self.optimiser.reset();

        self.arch_report = Archiver::from_path(session, "mpc_ctrl/status_report.csv")
            .map_err(|e| MpcCtrlError::ArchiveInitError(e.to_string()))?;

        Ok(())
    }

    /// Run one control cycle.
    ///
    /// On error the cycle is rejected: the warm start is dropped and the held
    /// command (see `held_cmd`) should be sent instead.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        self.begin_cycle();

        match self.run_pipeline(input_data) {
            Ok(cmd) => {
                self.held = (cmd.steering_angle, cmd.throttle);
                self.report.cycle_ok = true;
                self.report.steer_dem_norm = cmd.steering_angle;
                self.report.throttle_dem = cmd.throttle;

                Ok((cmd, self.report))
            },
            Err(e) => {
                warn!("MpcCtrl cycle {} rejected: {}", self.cycle, e);
                self.reject_cycle();
                Err(e)
            }
        }
    }
}

impl<O: Optimiser> Archived for MpcCtrl<O> {
    fn write(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.arch_report.serialise(&self.report)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Check that the telemetry can be used and extract its waypoints.
fn validate_telemetry(telem: &Telemetry) -> Result<Vec<Point2<f64>>, MpcCtrlError> {
    let num_points = match telem.num_waypoints() {
        Some(n) => n,
        None => return Err(MpcCtrlError::MalformedTelemetry(format!(
            "waypoint arrays have different lengths ({} x, {} y)",
            telem.ptsx.len(), telem.ptsy.len()
        )))
    };

    if num_points == 0 {
        return Err(MpcCtrlError::MalformedTelemetry("no waypoints".into()))
    }

    let scalars = [
        ("x", telem.x),
        ("y", telem.y),
        ("psi", telem.psi),
        ("speed", telem.speed),
        ("steering_angle", telem.steering_angle),
        ("throttle", telem.throttle),
    ];
    for &(name, val) in scalars.iter() {
        if !val.is_finite() {
            return Err(MpcCtrlError::MalformedTelemetry(
                format!("{} is not finite ({})", name, val)))
        }
    }

    let waypoints: Vec<Point2<f64>> = telem.ptsx.iter()
        .zip(telem.ptsy.iter())
        .map(|(&x, &y)| Point2::new(x, y))
        .collect();

    if let Some(i) = waypoints.iter().position(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(MpcCtrlError::MalformedTelemetry(
            format!("waypoint {} is not finite", i)))
    }

    Ok(waypoints)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::{to_world_frame, OptimiserError, PolyFitError, Solution};

    fn test_params() -> Params {
        let mut params = Params::default();
        params.solver.max_solve_time_s = 10.0;
        params.solver.max_iterations = 500;
        params
    }

    /// Build telemetry for a vehicle at `pose` given waypoints in its own
    /// frame.
    fn telemetry(pose: &Pose, local: &[Point2<f64>], speed: f64) -> Telemetry {
        let world = to_world_frame(pose, local);

        Telemetry {
            ptsx: world.iter().map(|p| p.x).collect(),
            ptsy: world.iter().map(|p| p.y).collect(),
            x: pose.position.x,
            y: pose.position.y,
            psi: pose.psi_rad,
            speed,
            steering_angle: 0.0,
            throttle: 0.0,
        }
    }

    fn curve(k: f64) -> Vec<Point2<f64>> {
        (0..11).map(|i| {
            let x = 5.0 * i as f64;
            Point2::new(x, k * x * x)
        })
        .collect()
    }

    /// Optimiser which always fails.
    struct FailingOptimiser;

    impl Optimiser for FailingOptimiser {
        fn solve(
            &mut self,
            _init: &MpcState,
            _poly: &Polynomial,
            _params: &Params
        ) -> Result<Solution, OptimiserError> {
            Err(OptimiserError::NonFiniteSolution(std::f64::NAN))
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_straight_ahead_from_rest() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let pose = Pose::new(120.0, -35.0, 0.7);
        let telem = telemetry(&pose, &curve(0.0), 0.0);

        let (cmd, report) = ctrl.proc(&telem).unwrap();

        assert!(report.cycle_ok);
        assert_eq!(report.num_waypoints, 11);
        assert!(cmd.steering_angle.abs() < 1e-3, "steering: {}", cmd.steering_angle);
        assert!(cmd.throttle > 0.0);
        assert_eq!(cmd.mpc_x.len(), ctrl.params().horizon_steps);
        for y in cmd.mpc_y.iter() {
            assert!(y.abs() < 1e-3, "predicted y: {}", y);
        }
        assert_eq!(cmd.next_x.len(), ctrl.params().ref_line_num_points);
        assert_eq!(ctrl.held_cmd().throttle, cmd.throttle);
    }

    #[test]
    fn test_left_curve_steers_left() {
        let pose = Pose::new(-40.0, 12.0, -2.1);

        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let (gentle, _) = ctrl.proc(&telemetry(&pose, &curve(0.001), 30.0)).unwrap();

        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let (sharp, _) = ctrl.proc(&telemetry(&pose, &curve(0.004), 30.0)).unwrap();

        assert!(gentle.steering_angle < 0.0, "gentle: {}", gentle.steering_angle);
        assert!(sharp.steering_angle < 0.0, "sharp: {}", sharp.steering_angle);
        assert!(sharp.steering_angle.abs() > gentle.steering_angle.abs());
        assert!(sharp.steering_angle >= -1.0);

        // Mirror image to the right
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let (right, _) = ctrl.proc(&telemetry(&pose, &curve(-0.004), 30.0)).unwrap();
        assert!((right.steering_angle + sharp.steering_angle).abs() < 1e-4);
    }

    #[test]
    fn test_too_few_waypoints() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);

        let (first, _) = ctrl.proc(&telemetry(&pose, &curve(0.004), 30.0)).unwrap();

        let points = curve(0.0);
        match ctrl.proc(&telemetry(&pose, &points[..3], 30.0)) {
            Err(MpcCtrlError::PolyFitError(PolyFitError::Underdetermined { .. })) => (),
            r => panic!("Expected underdetermined fit, got {:?}", r)
        }

        assert!(!ctrl.optimiser.is_warm());

        let held = ctrl.held_cmd();
        assert_eq!(held.steering_angle, first.steering_angle);
        assert_eq!(held.throttle, first.throttle);
        assert!(held.mpc_x.is_empty());
    }

    #[test]
    fn test_malformed_telemetry() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);

        let mut telem = telemetry(&pose, &curve(0.0), 10.0);
        telem.ptsy.pop();
        assert!(matches!(ctrl.proc(&telem), Err(MpcCtrlError::MalformedTelemetry(_))));

        let mut telem = telemetry(&pose, &curve(0.0), 10.0);
        telem.speed = std::f64::NAN;
        assert!(matches!(ctrl.proc(&telem), Err(MpcCtrlError::MalformedTelemetry(_))));

        let mut telem = telemetry(&pose, &curve(0.0), 10.0);
        telem.ptsx.clear();
        telem.ptsy.clear();
        assert!(matches!(ctrl.proc(&telem), Err(MpcCtrlError::MalformedTelemetry(_))));

        assert_eq!(ctrl.held_cmd(), SteerCmd::hold(0.0, 0.0));
    }

    #[test]
    fn test_optimiser_failure_holds_command() {
        let mut ctrl = MpcCtrl::with_optimiser(test_params(), FailingOptimiser).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);

        match ctrl.proc(&telemetry(&pose, &curve(0.0), 10.0)) {
            Err(MpcCtrlError::OptimiserError(_)) => (),
            r => panic!("Expected optimiser error, got {:?}", r)
        }
        assert_eq!(ctrl.held_cmd(), SteerCmd::hold(0.0, 0.0));
    }

    #[test]
    fn test_skip_cycle() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);
        let (cmd, _) = ctrl.proc(&telemetry(&pose, &curve(0.001), 20.0)).unwrap();

        let skipped = ctrl.skip_cycle();

        assert_eq!(skipped, SteerCmd::hold(cmd.steering_angle, cmd.throttle));
        assert!(!ctrl.report.cycle_ok);
        assert_eq!(ctrl.report.cycle, 2);
        assert!(!ctrl.optimiser.is_warm());
    }

    #[test]
    fn test_warm_start_follows_solve_status() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let pose = Pose::new(3.0, -8.0, 1.2);

        let (_, report) = ctrl.proc(&telemetry(&pose, &curve(0.002), 25.0)).unwrap();
        assert_eq!(
            ctrl.optimiser.is_warm(),
            report.solve_status == Some(SolveStatus::Converged)
        );

        // A rejected cycle always drops the warm start
        let mut telem = telemetry(&pose, &curve(0.002), 25.0);
        telem.psi = std::f64::INFINITY;
        assert!(ctrl.proc(&telem).is_err());
        assert!(!ctrl.optimiser.is_warm());
    }

    #[test]
    fn test_iteration_limit_still_commands() {
        let mut params = test_params();
        params.solver.max_iterations = 1;
        let mut ctrl = MpcCtrl::new(params).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);

        let (cmd, report) = ctrl.proc(&telemetry(&pose, &curve(0.004), 30.0)).unwrap();

        assert!(report.cycle_ok);
        assert_eq!(report.solve_status, Some(SolveStatus::IterationLimit));
        assert!(cmd.steering_angle.is_finite() && cmd.steering_angle.abs() <= 1.0);
        assert!(cmd.throttle.is_finite() && cmd.throttle.abs() <= 1.0);
        assert_eq!(cmd.mpc_x.len(), ctrl.params().horizon_steps);
        assert_eq!(ctrl.held_cmd().steering_angle, cmd.steering_angle);
        assert!(!ctrl.optimiser.is_warm());
    }

    #[test]
    fn test_time_budget_still_commands() {
        let mut params = test_params();
        params.solver.max_solve_time_s = 1e-9;
        let mut ctrl = MpcCtrl::new(params).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);

        let (cmd, report) = ctrl.proc(&telemetry(&pose, &curve(0.004), 30.0)).unwrap();

        assert!(report.cycle_ok);
        assert_eq!(report.solve_status, Some(SolveStatus::TimeBudgetExceeded));
        assert!(cmd.steering_angle.is_finite() && cmd.throttle.is_finite());
        assert!(!ctrl.optimiser.is_warm());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = test_params();
        params.timestep_s = 0.0;

        assert!(matches!(MpcCtrl::new(params), Err(MpcCtrlError::InvalidParams(_))));
    }
}
