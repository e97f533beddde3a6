//! In-memory DMC controller simulator.
//!
//! [`MockDmc`] answers the subset of the command set the gantry uses (`SH`,
//! `MO`, `ST`, `KS`, `DP`, `SP`, `PA`, `PR`, `JG`, `BG`, `MG _BGx`, `MG _LRx`,
//! `TC1`) and keeps a log of every statement it received. Clones share state,
//! so a test can hand one clone to a [`GantryController`](crate::gantry::GantryController)
//! and inspect the other.
//!
//! Motion completes on `BG` unless busy polls are configured, in which case
//! `MG _BGx` reports the axis as moving for that many queries first.

use std::sync::{Arc, Mutex, MutexGuard};

use super::dmc::{ControllerErrorCode, DmcError, DmcLink, DmcResult};

const AXIS_LETTERS: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

/// Where jogging into the reverse limit leaves an axis, in steps.
pub const DEFAULT_LIMIT_POSITION: i64 = -20_000;

/// Failure injected when a statement matching a prefix arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Reject the statement with `?`; `TC1` then reports this code.
    Reject { code: i32, message: String },
    /// Drop the connection. This and every later statement fails with an I/O error.
    Disconnect,
    /// Accept the statement without executing it and answer with this text.
    Respond(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AxisMode {
    Idle,
    Target(i64),
    Jog(f64),
}

#[derive(Debug)]
struct MockState {
    position: [i64; 5],
    speeds: [f64; 5],
    smoothing: [Option<f64>; 5],
    modes: [AxisMode; 5],
    reverse_limit: [bool; 5],
    limit_position: [i64; 5],
    moving: [u32; 5],
    busy_polls: u32,
    stuck: bool,
    motors_on: bool,
    last_error: ControllerErrorCode,
    failures: Vec<(String, MockFailure)>,
    disconnected: bool,
    log: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            position: [0; 5],
            speeds: [0.0; 5],
            smoothing: [None; 5],
            modes: [AxisMode::Idle; 5],
            reverse_limit: [false; 5],
            limit_position: [DEFAULT_LIMIT_POSITION; 5],
            moving: [0; 5],
            busy_polls: 0,
            stuck: false,
            motors_on: false,
            last_error: ControllerErrorCode {
                code: 0,
                message: String::new(),
            },
            failures: Vec::new(),
            disconnected: false,
            log: Vec::new(),
        }
    }
}

/// Simulated DMC controller implementing [`DmcLink`].
#[derive(Debug, Clone, Default)]
pub struct MockDmc {
    state: Arc<Mutex<MockState>>,
}

impl MockDmc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the controller reporting this position.
    pub fn with_position(self, position: [i64; 5]) -> Self {
        self.state().position = position;
        self
    }

    /// Start with the given reverse limit switches engaged.
    pub fn with_reverse_limits(self, engaged: [bool; 5]) -> Self {
        self.state().reverse_limit = engaged;
        self
    }

    /// Report each axis as moving for `polls` `_BG` queries after a begin.
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.state().busy_polls = polls;
        self
    }

    /// Never report motion complete.
    pub fn stuck(self) -> Self {
        self.state().stuck = true;
        self
    }

    /// Inject a failure for the next statement starting with `prefix`.
    ///
    /// Rejections and canned responses fire once; a disconnect is permanent.
    pub fn fail_on(self, prefix: &str, failure: MockFailure) -> Self {
        self.state().failures.push((prefix.to_string(), failure));
        self
    }

    /// Every statement received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Position currently held by the simulated controller.
    pub fn position(&self) -> [i64; 5] {
        self.state().position
    }

    /// Move the simulated axes without going through the command set.
    pub fn set_position(&self, position: [i64; 5]) {
        self.state().position = position;
    }

    pub fn speeds(&self) -> [f64; 5] {
        self.state().speeds
    }

    pub fn smoothing(&self) -> [Option<f64>; 5] {
        self.state().smoothing
    }

    pub fn motors_on(&self) -> bool {
        self.state().motors_on
    }

    pub fn reverse_limits(&self) -> [bool; 5] {
        self.state().reverse_limit
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DmcLink for MockDmc {
    fn command(&mut self, command: &str) -> DmcResult<String> {
        let mut state = self.state();
        let mut responses = Vec::new();
        for statement in command.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let response = state.statement(statement)?;
            if !response.is_empty() {
                responses.push(response);
            }
        }
        Ok(responses.join("\n"))
    }
}

impl MockState {
    fn statement(&mut self, statement: &str) -> DmcResult<String> {
        self.log.push(statement.to_string());

        if self.disconnected {
            return Err(broken_pipe());
        }

        if let Some(index) = self
            .failures
            .iter()
            .position(|(prefix, _)| statement.starts_with(prefix.as_str()))
        {
            let (_, failure) = &self.failures[index];
            match failure.clone() {
                MockFailure::Disconnect => {
                    self.disconnected = true;
                    return Err(broken_pipe());
                }
                MockFailure::Reject { code, message } => {
                    self.failures.remove(index);
                    return Err(self.reject(statement, code, &message));
                }
                MockFailure::Respond(response) => {
                    self.failures.remove(index);
                    return Ok(response);
                }
            }
        }

        match self.execute(statement) {
            Ok(response) => Ok(response),
            Err((code, message)) => Err(self.reject(statement, code, message)),
        }
    }

    fn reject(&mut self, statement: &str, code: i32, message: &str) -> DmcError {
        let code = ControllerErrorCode {
            code,
            message: message.to_string(),
        };
        self.last_error = code.clone();
        DmcError::ControllerError {
            command: statement.to_string(),
            code,
        }
    }

    fn execute(&mut self, statement: &str) -> Result<String, (i32, &'static str)> {
        if statement == "TC1" {
            let code = &self.last_error;
            return Ok(format!("{} {}", code.code, code.message).trim().to_string());
        }
        if let Some(operand) = statement.strip_prefix("MG ") {
            return self.message(operand.trim());
        }
        if let Some(axes) = statement.strip_prefix("BG") {
            return self.begin(axes.trim()).map(|_| String::new());
        }

        let (mnemonic, args) = match statement.split_once(' ') {
            Some((mnemonic, args)) => (mnemonic, args.trim()),
            None => (statement, ""),
        };
        let fields = parse_args(args)?;

        match mnemonic {
            "SH" => self.motors_on = true,
            "MO" => {
                self.motors_on = false;
                self.halt();
            }
            "ST" => self.halt(),
            "KS" => assign(&mut self.smoothing, &fields, Some),
            "SP" => assign(&mut self.speeds, &fields, |v| v),
            "DP" => assign(&mut self.position, &fields, |v| v.round() as i64),
            "PA" if fields.iter().any(Field::is_query) => {
                return Ok(self
                    .position
                    .iter()
                    .map(|p| format!(" {p}"))
                    .collect::<Vec<_>>()
                    .join(","));
            }
            "PA" => {
                let mut targets = [None; 5];
                assign(&mut targets, &fields, |v| Some(v.round() as i64));
                for (mode, target) in self.modes.iter_mut().zip(targets) {
                    if let Some(target) = target {
                        *mode = AxisMode::Target(target);
                    }
                }
            }
            "PR" => {
                let mut deltas = [None; 5];
                assign(&mut deltas, &fields, |v| Some(v.round() as i64));
                for (i, delta) in deltas.into_iter().enumerate() {
                    if let Some(delta) = delta {
                        self.modes[i] = AxisMode::Target(self.position[i] + delta);
                    }
                }
            }
            "JG" => {
                let mut speeds = [None; 5];
                assign(&mut speeds, &fields, Some);
                for (mode, speed) in self.modes.iter_mut().zip(speeds) {
                    if let Some(speed) = speed {
                        *mode = AxisMode::Jog(speed);
                    }
                }
            }
            _ => return Err((1, "Unrecognized command")),
        }
        Ok(String::new())
    }

    fn message(&mut self, operand: &str) -> Result<String, (i32, &'static str)> {
        let axis = |prefix: &str| {
            operand
                .strip_prefix(prefix)
                .and_then(|letter| AXIS_LETTERS.iter().position(|l| letter == l.to_string()))
        };

        if let Some(i) = axis("_BG") {
            let moving = if self.stuck {
                true
            } else if self.moving[i] > 0 {
                self.moving[i] -= 1;
                true
            } else {
                false
            };
            return Ok(flag(moving));
        }
        if let Some(i) = axis("_LR") {
            // 0 while sitting on the switch, 1 otherwise
            return Ok(flag(!self.reverse_limit[i]));
        }
        Err((1, "Unrecognized command"))
    }

    fn begin(&mut self, axes: &str) -> Result<(), (i32, &'static str)> {
        let selected: Vec<usize> = if axes.is_empty() {
            (0..5).collect()
        } else {
            axes.chars()
                .map(|c| AXIS_LETTERS.iter().position(|&l| l == c))
                .collect::<Option<_>>()
                .ok_or((1, "Unrecognized command"))?
        };

        if !self.motors_on {
            return Err((20, "Begin not valid with motor off"));
        }
        for &i in &selected {
            if matches!(self.modes[i], AxisMode::Jog(speed) if speed < 0.0) && self.reverse_limit[i]
            {
                return Err((22, "Begin not possible due to Limit Switch"));
            }
        }

        for i in selected {
            match self.modes[i] {
                AxisMode::Idle => continue,
                AxisMode::Target(target) if target == self.position[i] => {
                    self.modes[i] = AxisMode::Idle;
                    continue;
                }
                AxisMode::Target(target) => {
                    if target > self.position[i] {
                        self.reverse_limit[i] = false;
                    }
                    self.position[i] = target;
                }
                AxisMode::Jog(speed) if speed < 0.0 => {
                    self.position[i] = self.limit_position[i];
                    self.reverse_limit[i] = true;
                }
                AxisMode::Jog(speed) if speed > 0.0 => {
                    self.position[i] += speed.round() as i64;
                    self.reverse_limit[i] = false;
                }
                AxisMode::Jog(_) => continue,
            }
            self.modes[i] = AxisMode::Idle;
            self.moving[i] = self.busy_polls;
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.modes = [AxisMode::Idle; 5];
        self.moving = [0; 5];
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Empty,
    Query,
    Value(f64),
}

impl Field {
    fn is_query(&self) -> bool {
        *self == Field::Query
    }
}

fn parse_args(args: &str) -> Result<Vec<Field>, (i32, &'static str)> {
    if args.is_empty() {
        return Ok(Vec::new());
    }
    let fields: Vec<Field> = args
        .split(',')
        .map(|field| match field.trim() {
            "" => Ok(Field::Empty),
            "?" => Ok(Field::Query),
            value => value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Field::Value)
                .ok_or((57, "Bad data")),
        })
        .collect::<Result<_, _>>()?;
    if fields.len() > 5 {
        return Err((57, "Bad data"));
    }
    Ok(fields)
}

/// Write each numeric field into its axis slot, leaving empty fields untouched.
fn assign<T>(slots: &mut [T; 5], fields: &[Field], convert: impl Fn(f64) -> T) {
    for (slot, field) in slots.iter_mut().zip(fields) {
        if let Field::Value(value) = field {
            *slot = convert(*value);
        }
    }
}

fn flag(set: bool) -> String {
    if set {
        " 1.0000".to_string()
    } else {
        " 0.0000".to_string()
    }
}

fn broken_pipe() -> DmcError {
    DmcError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "connection to controller lost",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galil::DmcDevice;

    #[test]
    fn test_position_query_format() {
        let mut dmc = MockDmc::new().with_position([1000, -5, 0, 3, 0]);
        let response = dmc.command("PA ?,?,?,?,?").unwrap();
        assert_eq!(
            DmcDevice::parse_fields(&response).unwrap(),
            vec![1000.0, -5.0, 0.0, 3.0, 0.0]
        );
    }

    #[test]
    fn test_relative_move_applies_on_begin() {
        let mut dmc = MockDmc::new();
        dmc.command("SH").unwrap();
        dmc.command("PR 1000,0,0,0,-3").unwrap();
        assert_eq!(dmc.position(), [0; 5]);

        dmc.command("BG").unwrap();
        assert_eq!(dmc.position(), [1000, 0, 0, 0, -3]);
    }

    #[test]
    fn test_partial_define_position() {
        let mut dmc = MockDmc::new().with_position([5, 6, 7, 8, 9]);
        dmc.command("DP 0,0,0").unwrap();
        assert_eq!(dmc.position(), [0, 0, 0, 8, 9]);

        dmc.command("KS ,,,25,25").unwrap();
        assert_eq!(dmc.smoothing(), [None, None, None, Some(25.0), Some(25.0)]);
    }

    #[test]
    fn test_begin_requires_motors() {
        let mut dmc = MockDmc::new();
        dmc.command("PR 1,0,0,0,0").unwrap();
        let err = dmc.command("BG").unwrap_err();
        assert!(matches!(err, DmcError::ControllerError { ref code, .. } if code.code == 20));
        assert_eq!(dmc.tell_error().unwrap().code, 20);
    }

    #[test]
    fn test_jog_into_reverse_limit() {
        let mut dmc = MockDmc::new()
            .with_position([100, 200, 300, 4, 5])
            .with_reverse_limits([true, false, false, false, false]);
        dmc.command("SH").unwrap();

        assert_eq!(dmc.command("MG _LRA").unwrap(), " 0.0000");
        assert_eq!(dmc.command("MG _LRB").unwrap(), " 1.0000");

        dmc.command("JG 0,-1000,-1000,0,0").unwrap();
        dmc.command("BGBC").unwrap();
        assert_eq!(
            dmc.position(),
            [100, DEFAULT_LIMIT_POSITION, DEFAULT_LIMIT_POSITION, 4, 5]
        );
        assert_eq!(dmc.reverse_limits(), [true, true, true, false, false]);
    }

    #[test]
    fn test_busy_polls_count_down() {
        let mut dmc = MockDmc::new().with_busy_polls(2);
        dmc.command("SH;PR 10,0,0,0,0;BG").unwrap();

        assert_eq!(dmc.command("MG _BGA").unwrap(), " 1.0000");
        assert_eq!(dmc.command("MG _BGA").unwrap(), " 1.0000");
        assert_eq!(dmc.command("MG _BGA").unwrap(), " 0.0000");
        assert_eq!(dmc.command("MG _BGB").unwrap(), " 0.0000");
    }

    #[test]
    fn test_injected_rejection_fires_once() {
        let mut dmc = MockDmc::new().fail_on(
            "SP",
            MockFailure::Reject {
                code: 6,
                message: "Number out of range".to_string(),
            },
        );
        assert!(dmc.command("SP 1000,1000,1000,1000,1000").is_err());
        assert_eq!(
            dmc.tell_error().unwrap().to_string(),
            "error 6 (Number out of range)"
        );
        assert!(dmc.command("SP 1000,1000,1000,1000,1000").is_ok());
    }

    #[test]
    fn test_disconnect_is_permanent() {
        let mut dmc = MockDmc::new().fail_on("BG", MockFailure::Disconnect);
        assert!(dmc.command("SH").is_ok());
        assert!(matches!(dmc.command("BG"), Err(DmcError::Io(_))));
        assert!(matches!(dmc.command("ST"), Err(DmcError::Io(_))));
        assert_eq!(dmc.commands(), vec!["SH", "BG", "ST"]);
    }

    #[test]
    fn test_canned_response_replaces_execution_once() {
        let mut dmc = MockDmc::new()
            .with_position([7, 0, 0, 0, 0])
            .fail_on("PA ?", MockFailure::Respond(" 7, 0".to_string()));
        assert_eq!(dmc.command("PA ?,?,?,?,?").unwrap(), " 7, 0");
        assert_eq!(dmc.command("PA ?,?,?,?,?").unwrap(), " 7, 0, 0, 0, 0");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut dmc = MockDmc::new();
        assert!(dmc.command("XQ #AUTO").is_err());
        assert_eq!(dmc.tell_error().unwrap().code, 1);
    }
}
