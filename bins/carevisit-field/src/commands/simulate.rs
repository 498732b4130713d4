//! Replay a position trace through a real check-in session

use crate::trace::{Step, Trace};
use anyhow::Result;
use carevisit_api_client::VisitStatus;
use carevisit_checkin::{
    CheckInController, InMemoryVisitStore, ManualSource, PreciseOutcome, SessionOutcome, Snapshot,
    Status,
};
use carevisit_core::config::CheckInConfig;
use carevisit_core::error::exit_codes;
use carevisit_geo::Coordinate;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A snapshot observed after a step
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub step: usize,
    pub label: String,
    pub snapshot: Snapshot,
}

/// Result of a replay
#[derive(Debug, Serialize)]
pub struct Simulation {
    pub frames: Vec<Frame>,
    pub outcome: SessionOutcome,
    pub writes: usize,
}

impl Simulation {
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            SessionOutcome::CheckedIn(_) => exit_codes::SUCCESS,
            SessionOutcome::Fallback => exit_codes::FALLBACK_TAKEN,
            SessionOutcome::Exited => exit_codes::CHECK_IN_FAILED,
        }
    }
}

/// Run the `simulate` command
pub async fn run(path: &Path, config: &CheckInConfig, settle: Duration, format: &str) -> Result<i32> {
    let trace = Trace::load(path)?;
    let simulation = simulate(&trace, config, settle).await?;

    if format == "json" {
        let report = serde_json::json!({
            "simulation": simulation,
            "metrics": carevisit_telemetry::metrics().export_json(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&trace, &simulation);
    }

    Ok(simulation.exit_code())
}

/// Replay `trace`, waiting `settle` after each step for the session to react
pub async fn simulate(trace: &Trace, config: &CheckInConfig, settle: Duration) -> Result<Simulation> {
    let source = ManualSource::new();
    source.set_permission(trace.permission);
    let store = Arc::new(InMemoryVisitStore::new().with_visit(trace.visit_target()));

    let (controller, handle) = CheckInController::new(
        trace.visit_id.clone(),
        Arc::new(source.clone()),
        Arc::clone(&store),
        config,
    );
    let session = tokio::spawn(controller.run());

    let mut frames = Vec::new();
    tokio::time::sleep(settle).await;
    record(&mut frames, 0, "open screen".to_string(), handle.snapshot());

    for (index, step) in trace.steps.iter().enumerate() {
        if session.is_finished() {
            debug!(step = index + 1, "Session already ended, skipping remaining steps");
            break;
        }

        match step {
            Step::Fix { latitude, longitude } => {
                source.emit_fix(Coordinate::new(*latitude, *longitude));
            }
            Step::StreamError { error } => {
                source.emit_error(*error);
            }
            Step::Precise { latitude, longitude } => {
                source.push_precise(PreciseOutcome::Fix(Coordinate::new(*latitude, *longitude)));
            }
            Step::PreciseError { error } => source.push_precise(PreciseOutcome::Fail(*error)),
            Step::PreciseHang => source.push_precise(PreciseOutcome::Hang),
            Step::FailWrite { message } => store.fail_next_write(message.clone()),
            Step::CancelVisit => store.set_status(&trace.visit_id, VisitStatus::Cancelled),
            Step::CheckIn => {
                handle.attempt_check_in();
            }
            Step::Retry => {
                handle.retry();
            }
            Step::Fallback => {
                handle.go_to_fallback();
            }
            Step::Exit => {
                handle.exit();
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }

        tokio::time::sleep(settle).await;
        record(&mut frames, index + 1, step.to_string(), handle.snapshot());
    }

    if !session.is_finished() {
        handle.exit();
    }
    let outcome = session.await?;
    record(&mut frames, trace.steps.len() + 1, "end".to_string(), handle.snapshot());

    Ok(Simulation {
        frames,
        outcome,
        writes: store.write_count(),
    })
}

/// Keep a frame only when the snapshot changed
fn record(frames: &mut Vec<Frame>, step: usize, label: String, snapshot: Snapshot) {
    if frames.last().is_some_and(|f| f.snapshot == snapshot) {
        return;
    }
    frames.push(Frame { step, label, snapshot });
}

fn print_text(trace: &Trace, simulation: &Simulation) {
    println!();
    println!(
        "  {} {} {}",
        "Check-in replay".blue().bold(),
        trace.visit_id.bold(),
        format!("target {}", trace.target).dimmed()
    );
    println!();

    for frame in &simulation.frames {
        let snapshot = &frame.snapshot;
        let status = snapshot.status.to_string();
        let status = match &snapshot.status {
            Status::Success => status.green().bold().to_string(),
            Status::Error(_) => status.red().bold().to_string(),
            Status::Tracking(carevisit_checkin::Proximity::InRange) => status.green().to_string(),
            _ => status.yellow().to_string(),
        };
        let distance = if snapshot.locating {
            "locating…".to_string()
        } else {
            snapshot.distance_label.clone().unwrap_or_default()
        };

        println!(
            "  {:>3}  {:<28} {:<34} {}",
            frame.step.dimmed(),
            frame.label,
            status,
            distance.cyan()
        );
        if let Some(message) = &snapshot.error_message {
            println!("       {} {}", "↳".red(), message);
        }
        if let Some(warning) = &snapshot.warning {
            println!("       {} {}", "⚠".yellow(), warning);
        }
    }

    println!();
    let summary = match &simulation.outcome {
        SessionOutcome::CheckedIn(fix) => {
            format!("{} at {}", "Checked in".green().bold(), fix.coordinate)
        }
        SessionOutcome::Fallback => "Alternate check-in taken".yellow().bold().to_string(),
        SessionOutcome::Exited => "Left without checking in".red().bold().to_string(),
    };
    println!("  {summary}  {}", format!("({} write attempt(s))", simulation.writes).dimmed());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevisit_checkin::ErrorKind;

    const SETTLE: Duration = Duration::from_millis(30);

    fn trace(steps: &str) -> Trace {
        Trace::parse(&format!(
            "target = {{ latitude = 0.0, longitude = 0.0 }}\n{steps}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_replay_successful_check_in() {
        let trace = trace(
            r#"
[[steps]]
step = "fix"
latitude = 0.0
longitude = 0.0005

[[steps]]
step = "check_in"

[[steps]]
step = "fix"
latitude = 0.0
longitude = 0.00005

[[steps]]
step = "precise"
latitude = 0.0
longitude = 0.0

[[steps]]
step = "check_in"
"#,
        );

        let simulation = simulate(&trace, &CheckInConfig::default(), SETTLE).await.unwrap();

        assert!(matches!(simulation.outcome, SessionOutcome::CheckedIn(_)));
        assert_eq!(simulation.exit_code(), exit_codes::SUCCESS);
        assert_eq!(simulation.writes, 1);
        assert_eq!(simulation.frames.last().unwrap().snapshot.status, Status::Success);
    }

    #[tokio::test]
    async fn test_replay_denied_permission_falls_back() {
        let mut trace = trace("[[steps]]\nstep = \"fallback\"\n");
        trace.permission = carevisit_checkin::Permission::Denied;

        let simulation = simulate(&trace, &CheckInConfig::default(), SETTLE).await.unwrap();

        assert_eq!(simulation.outcome, SessionOutcome::Fallback);
        assert_eq!(simulation.exit_code(), exit_codes::FALLBACK_TAKEN);
        assert!(simulation.frames.iter().any(|f| matches!(
            &f.snapshot.status,
            Status::Error(e) if e.kind == ErrorKind::PermissionDenied
        )));
    }

    #[tokio::test]
    async fn test_replay_ends_open_session() {
        let trace = trace(
            "[[steps]]\nstep = \"fix\"\nlatitude = 0.0\nlongitude = 0.0005\n",
        );

        let simulation = simulate(&trace, &CheckInConfig::default(), SETTLE).await.unwrap();

        assert_eq!(simulation.outcome, SessionOutcome::Exited);
        assert_eq!(simulation.exit_code(), exit_codes::CHECK_IN_FAILED);
        assert_eq!(simulation.writes, 0);
    }
}
