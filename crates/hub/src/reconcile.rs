//! Reconciliation loop: turns desired pump states into relay commands.
//!
//! Every tick compares this tick's desired vector with the one the previous
//! tick acted on and sorts each pump into one of four sets:
//!
//! ```text
//!             desired changed     desired unchanged
//!   true      TurnOn              KeepOn
//!   false     TurnOff             KeepOff
//! ```
//!
//! Manual overrides then rewrite the sets: a forced pump is commanded once
//! when it enters its mode and never "kept"; a pump returning to auto is
//! re-asserted once with its computed state.
//!
//! TurnOn/TurnOff are sent immediately. Keep commands (for `keep_state`
//! pumps) and status polls run on a forced refresh, which happens when the
//! refresh window has elapsed or the tick had any transition. Device errors
//! are logged and otherwise ignored: the next transition or refresh is the
//! retry, so a `keep_state` pump is never wrong for longer than one refresh
//! window.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::overrides::OverrideMode;
use crate::state::{PumpSnapshot, SharedHub, TickSnapshot};

/// Default cadence of the loop.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default forced-refresh window.
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Per-pump input to [`plan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeInput {
    pub desired: bool,
    pub previous: bool,
    pub mode: OverrideMode,
    pub last_mode: OverrideMode,
}

impl From<&PumpSnapshot> for EdgeInput {
    fn from(p: &PumpSnapshot) -> Self {
        Self {
            desired: p.desired,
            previous: p.previous,
            mode: p.mode,
            last_mode: p.last_mode,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickPlan {
    pub turn_on: BTreeSet<usize>,
    pub turn_off: BTreeSet<usize>,
    pub keep_on: BTreeSet<usize>,
    pub keep_off: BTreeSet<usize>,
}

impl TickPlan {
    pub fn has_transitions(&self) -> bool {
        !self.turn_on.is_empty() || !self.turn_off.is_empty()
    }
}

/// Sort pumps into command sets: edge detection first, overrides second.
pub fn plan<I>(pumps: I) -> TickPlan
where
    I: IntoIterator<Item = EdgeInput>,
{
    let mut out = TickPlan::default();

    for (i, p) in pumps.into_iter().enumerate() {
        match (p.desired != p.previous, p.desired) {
            (true, true) => out.turn_on.insert(i),
            (true, false) => out.turn_off.insert(i),
            (false, true) => out.keep_on.insert(i),
            (false, false) => out.keep_off.insert(i),
        };

        match p.mode {
            OverrideMode::ForcedOff => {
                out.turn_on.remove(&i);
                if !out.turn_off.contains(&i) && p.last_mode != OverrideMode::ForcedOff {
                    out.turn_off.insert(i);
                }
            }
            OverrideMode::ForcedOn => {
                out.turn_off.remove(&i);
                if !out.turn_on.contains(&i) && p.last_mode != OverrideMode::ForcedOn {
                    out.turn_on.insert(i);
                }
            }
            // Back from an override: the device may not match the model, so
            // assert the computed state once.
            OverrideMode::Auto if p.last_mode.is_override() => {
                if p.desired {
                    out.turn_on.insert(i);
                } else {
                    out.turn_off.insert(i);
                }
            }
            OverrideMode::Auto => {}
        }

        if p.mode.is_override() || p.last_mode.is_override() {
            out.keep_on.remove(&i);
            out.keep_off.remove(&i);
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub tick: Duration,
    pub refresh: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            refresh: DEFAULT_REFRESH,
        }
    }
}

/// Relay state the previous tick left the pump in.
fn was_running(p: &PumpSnapshot) -> bool {
    match p.last_mode {
        OverrideMode::ForcedOn => true,
        OverrideMode::ForcedOff => false,
        OverrideMode::Auto => p.previous,
    }
}

pub struct Reconciler {
    hub: SharedHub,
    opts: ReconcileOptions,
    last_refresh: Option<Instant>,
}

impl Reconciler {
    pub fn new(hub: SharedHub, opts: ReconcileOptions) -> Self {
        Self {
            hub,
            opts,
            last_refresh: None,
        }
    }

    /// Run ticks until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.opts.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.opts.tick.as_millis() as u64,
            refresh_secs = self.opts.refresh.as_secs(),
            "reconciler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!("reconciler stopped");
    }

    /// One reconciliation pass.
    pub async fn tick(&mut self) -> TickPlan {
        let snap = self.hub.snapshot().await;
        let plan = plan(snap.pumps.iter().map(EdgeInput::from));

        for &i in &plan.turn_on {
            self.switch(&snap, i, true).await;
            self.log_run(&snap, i, true).await;
        }
        for &i in &plan.turn_off {
            self.switch(&snap, i, false).await;
            self.log_run(&snap, i, false).await;
        }

        let now = Instant::now();
        let window_elapsed = self
            .last_refresh
            .map_or(true, |t| now.saturating_duration_since(t) > self.opts.refresh);

        if window_elapsed || plan.has_transitions() {
            debug!(pumps = snap.pumps.len(), "forced refresh");
            for &i in &plan.keep_on {
                if snap.pumps[i].keep_state {
                    self.switch(&snap, i, true).await;
                }
            }
            for &i in &plan.keep_off {
                if snap.pumps[i].keep_state {
                    self.switch(&snap, i, false).await;
                }
            }
            self.poll_all(&snap).await;
            self.last_refresh = Some(now);
        }

        self.hub.commit_tick(&snap).await;
        plan
    }

    async fn switch(&self, snap: &TickSnapshot, index: usize, on: bool) {
        let pump = &snap.pumps[index];
        let driver = self.hub.drivers().get(pump.device);
        match driver.set_relay(&pump.ip, on).await {
            Ok(ack) => info!(
                pump = index,
                name = %pump.name,
                on,
                confirmed = ?ack.on,
                "relay switched"
            ),
            Err(e) => warn!(
                pump = index,
                ip = %pump.ip,
                kind = ?e.kind(),
                on,
                "relay command failed: {e}"
            ),
        }
    }

    async fn poll_all(&self, snap: &TickSnapshot) {
        for (i, pump) in snap.pumps.iter().enumerate() {
            let driver = self.hub.drivers().get(pump.device);
            match driver.status(&pump.ip).await {
                Ok(status) => {
                    self.hub
                        .record_status(snap.generation, i, status.on)
                        .await;
                }
                Err(e) => debug!(pump = i, ip = %pump.ip, kind = ?e.kind(), "status poll failed: {e}"),
            }
        }
    }

    /// Open or close a run row. Commands that do not change the pump's
    /// effective state (entering ForcedOn while already running, returning
    /// to auto in the forced state) leave the open row alone.
    async fn log_run(&self, snap: &TickSnapshot, index: usize, on: bool) {
        if !snap.db_log || was_running(&snap.pumps[index]) == on {
            return;
        }
        let Some(log) = self.hub.log() else {
            return;
        };
        let name = &snap.pumps[index].name;
        if on {
            log.pump_started(name).await;
        } else {
            log.pump_stopped(name).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Liveness, Switched};
    use crate::state::testing::{spec, test_hub, test_hub_with_log, TestHub};
    use std::sync::Arc;

    fn edge(desired: bool, previous: bool) -> EdgeInput {
        EdgeInput {
            desired,
            previous,
            ..Default::default()
        }
    }

    fn forced(desired: bool, previous: bool, mode: OverrideMode, last: OverrideMode) -> EdgeInput {
        EdgeInput {
            desired,
            previous,
            mode,
            last_mode: last,
        }
    }

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    // -- plan: edge detection -------------------------------------------------

    #[test]
    fn plan_sorts_by_edge_and_level() {
        let p = plan([
            edge(true, false),
            edge(false, true),
            edge(true, true),
            edge(false, false),
        ]);
        assert_eq!(p.turn_on, set(&[0]));
        assert_eq!(p.turn_off, set(&[1]));
        assert_eq!(p.keep_on, set(&[2]));
        assert_eq!(p.keep_off, set(&[3]));
        assert!(p.has_transitions());
    }

    #[test]
    fn plan_without_changes_has_no_transitions() {
        let p = plan([edge(true, true), edge(false, false)]);
        assert!(!p.has_transitions());
    }

    // -- plan: overrides ------------------------------------------------------

    #[test]
    fn entering_forced_on_turns_on_even_if_desired_false() {
        let p = plan([forced(false, false, OverrideMode::ForcedOn, OverrideMode::Auto)]);
        assert_eq!(p.turn_on, set(&[0]));
        assert!(p.turn_off.is_empty() && p.keep_off.is_empty() && p.keep_on.is_empty());
    }

    #[test]
    fn entering_forced_off_turns_off_even_if_desired_true() {
        let p = plan([forced(true, true, OverrideMode::ForcedOff, OverrideMode::Auto)]);
        assert_eq!(p.turn_off, set(&[0]));
        assert!(p.turn_on.is_empty() && p.keep_on.is_empty());
    }

    #[test]
    fn forced_off_suppresses_rising_edge() {
        let p = plan([forced(true, false, OverrideMode::ForcedOff, OverrideMode::ForcedOff)]);
        assert!(p.turn_on.is_empty());
        assert!(p.turn_off.is_empty());
    }

    #[test]
    fn forced_on_suppresses_falling_edge() {
        let p = plan([forced(false, true, OverrideMode::ForcedOn, OverrideMode::ForcedOn)]);
        assert!(p.turn_off.is_empty());
        assert!(p.turn_on.is_empty());
    }

    #[test]
    fn held_override_is_not_kept() {
        let p = plan([
            forced(true, true, OverrideMode::ForcedOn, OverrideMode::ForcedOn),
            forced(false, false, OverrideMode::ForcedOff, OverrideMode::ForcedOff),
        ]);
        assert_eq!(p, TickPlan::default());
    }

    #[test]
    fn switching_between_overrides_commands_new_state() {
        let p = plan([forced(true, true, OverrideMode::ForcedOff, OverrideMode::ForcedOn)]);
        assert_eq!(p.turn_off, set(&[0]));
        assert!(p.turn_on.is_empty());
    }

    #[test]
    fn returning_to_auto_reasserts_computed_state() {
        // Desired never changed while the override was active.
        let p = plan([
            forced(true, true, OverrideMode::Auto, OverrideMode::ForcedOff),
            forced(false, false, OverrideMode::Auto, OverrideMode::ForcedOn),
        ]);
        assert_eq!(p.turn_on, set(&[0]));
        assert_eq!(p.turn_off, set(&[1]));
        assert!(p.keep_on.is_empty() && p.keep_off.is_empty());
    }

    #[test]
    fn overrides_only_touch_their_own_pump() {
        let p = plan([
            forced(false, false, OverrideMode::ForcedOn, OverrideMode::Auto),
            edge(true, true),
        ]);
        assert_eq!(p.turn_on, set(&[0]));
        assert_eq!(p.keep_on, set(&[1]));
    }

    // -- loop -----------------------------------------------------------------

    fn reconciler(t: &TestHub) -> Reconciler {
        Reconciler::new(t.hub.clone(), ReconcileOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn active_valve_turns_pump_on_once() {
        let t = test_hub();
        t.valves.set(3, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[3])).await.unwrap();
        let mut r = reconciler(&t);

        let first = r.tick().await;
        assert_eq!(first.turn_on, set(&[0]));
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), true)]);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            let p = r.tick().await;
            assert_eq!(p.keep_on, set(&[0]));
        }
        // keep_state is off: no repeat command, even across a refresh.
        tokio::time::advance(Duration::from_secs(31)).await;
        r.tick().await;
        assert_eq!(t.driver.sets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn and_gate_keeps_pump_off() {
        let t = test_hub();
        t.valves.replace(vec![true, false]);
        let mut s = spec("Booster", "10.0.0.2", &[0]);
        s.need_valves_on = vec![1];
        t.hub.add_pump(s).await.unwrap();

        let p = reconciler(&t).tick().await;
        assert!(p.turn_on.is_empty());
        assert!(t.driver.sets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn valve_closing_turns_pump_off() {
        let t = test_hub();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        let mut r = reconciler(&t);
        r.tick().await;

        t.valves.set(0, false);
        t.hub.recompute_desired().await;
        let p = r.tick().await;

        assert_eq!(p.turn_off, set(&[0]));
        assert_eq!(
            t.driver.sets(),
            vec![("10.0.0.1".to_string(), true), ("10.0.0.1".to_string(), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keep_state_pump_is_reasserted_every_refresh() {
        let t = test_hub();
        t.valves.set(0, true);
        let mut s = spec("Well", "10.0.0.1", &[0]);
        s.keep_state = true;
        t.hub.add_pump(s).await.unwrap();
        let mut r = reconciler(&t);

        r.tick().await; // turn on
        t.driver.clear();

        for _ in 0..30 {
            tokio::time::advance(Duration::from_secs(1)).await;
            r.tick().await;
        }
        assert!(t.driver.sets().is_empty(), "re-asserted before the window");

        tokio::time::advance(Duration::from_secs(1)).await;
        r.tick().await;
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_state_pump_is_kept_off() {
        let t = test_hub();
        let mut s = spec("Well", "10.0.0.1", &[0]);
        s.keep_state = true;
        t.hub.add_pump(s).await.unwrap();
        t.hub.add_pump(spec("Other", "10.0.0.2", &[0])).await.unwrap();

        // First tick always refreshes.
        let p = reconciler(&t).tick().await;
        assert_eq!(p.keep_off, set(&[0, 1]));
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_polls_every_pump() {
        let t = test_hub();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        t.hub.add_pump(spec("Other", "10.0.0.2", &[5])).await.unwrap();
        let mut r = reconciler(&t);

        r.tick().await;
        assert_eq!(t.driver.status_polls(), 2);
        assert_eq!(t.hub.switched(0).await, Switched::On);
        assert_eq!(t.hub.switched(1).await, Switched::Off);

        // Quiet ticks inside the window do not poll.
        tokio::time::advance(Duration::from_secs(10)).await;
        r.tick().await;
        assert_eq!(t.driver.status_polls(), 2);

        // Any transition forces a refresh.
        t.valves.set(5, true);
        t.hub.recompute_desired().await;
        r.tick().await;
        assert_eq!(t.driver.status_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_pump_goes_offline() {
        let t = test_hub();
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        t.driver.set_unreachable("10.0.0.1");
        let mut r = reconciler(&t);

        for _ in 0..50 {
            r.tick().await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(t.hub.liveness(0).await, Liveness::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_on_turns_on_next_tick_then_holds() {
        let t = test_hub();
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        let mut r = reconciler(&t);
        r.tick().await;

        t.hub.set_mode(0, OverrideMode::ForcedOn).await.unwrap();
        t.driver.clear();

        let p = r.tick().await;
        assert_eq!(p.turn_on, set(&[0]));
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), true)]);

        t.driver.clear();
        for _ in 0..40 {
            tokio::time::advance(Duration::from_secs(1)).await;
            r.tick().await;
        }
        assert!(t.driver.sets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_off_turns_off_next_tick_despite_demand() {
        let t = test_hub();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        let mut r = reconciler(&t);
        r.tick().await;

        t.hub.set_mode(0, OverrideMode::ForcedOff).await.unwrap();
        t.driver.clear();

        let p = r.tick().await;
        assert_eq!(p.turn_off, set(&[0]));
        assert!(p.turn_on.is_empty());
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_auto_reasserts_once() {
        let t = test_hub();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        let mut r = reconciler(&t);
        r.tick().await;

        t.hub.set_mode(0, OverrideMode::ForcedOff).await.unwrap();
        r.tick().await;
        t.hub.set_mode(0, OverrideMode::Auto).await.unwrap();
        t.driver.clear();

        // Desired is still true, exactly as before the override.
        let p = r.tick().await;
        assert_eq!(p.turn_on, set(&[0]));
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), true)]);

        let p = r.tick().await;
        assert!(p.turn_on.is_empty());
        assert_eq!(p.keep_on, set(&[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_pump_does_not_block_others() {
        let t = test_hub();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Dead", "10.0.0.1", &[0])).await.unwrap();
        t.hub.add_pump(spec("Alive", "10.0.0.2", &[0])).await.unwrap();
        t.driver.set_unreachable("10.0.0.1");
        let mut r = reconciler(&t);

        let p = r.tick().await;
        assert_eq!(p.turn_on, set(&[0, 1]));
        assert_eq!(t.hub.switched(1).await, Switched::On);

        // The failed command is not retried on the next quiet tick.
        t.driver.clear();
        let p = r.tick().await;
        assert!(!p.has_transitions());
        assert!(t.driver.sets().is_empty());
    }

    #[tokio::test]
    async fn transitions_are_logged_when_enabled() {
        let sink = crate::eventlog::SqliteEventLog::connect("sqlite::memory:")
            .await
            .unwrap();
        let t = test_hub_with_log(Some(crate::eventlog::PumpLog::new(Arc::new(sink.clone()))));
        t.hub.set_db_log(true).await.unwrap();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        reconciler(&t).tick().await;

        use crate::eventlog::EventSink;
        // The run row exists, so closing it succeeds.
        sink.update_last_row("pump_well", 1, 99).await.unwrap();
    }

    /// Records sink calls as "<op> <table>".
    #[derive(Default)]
    struct RecordingSink {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn count(&self, op: &str) -> usize {
            let calls = self.calls.lock().unwrap();
            calls.iter().filter(|c| c.starts_with(op)).count()
        }

        fn record(&self, op: &str, table: &str) {
            self.calls.lock().unwrap().push(format!("{op} {table}"));
        }
    }

    #[async_trait::async_trait]
    impl crate::eventlog::EventSink for RecordingSink {
        async fn create_table(&self, table: &str, _columns: &[&str]) -> anyhow::Result<()> {
            self.record("create", table);
            Ok(())
        }

        async fn append_row(&self, table: &str, _row: &[i64]) -> anyhow::Result<()> {
            self.record("append", table);
            Ok(())
        }

        async fn update_last_row(
            &self,
            table: &str,
            _column: usize,
            _value: i64,
        ) -> anyhow::Result<()> {
            self.record("update", table);
            Ok(())
        }

        async fn rename_table(&self, old: &str, _new: &str) -> anyhow::Result<()> {
            self.record("rename", old);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forcing_a_running_pump_on_keeps_its_run_open() {
        let sink = Arc::new(RecordingSink::default());
        let t = test_hub_with_log(Some(crate::eventlog::PumpLog::new(sink.clone())));
        t.hub.set_db_log(true).await.unwrap();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        let mut r = reconciler(&t);

        r.tick().await;
        assert_eq!(sink.count("append"), 1);

        t.hub.set_mode(0, OverrideMode::ForcedOn).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let p = r.tick().await;
        assert_eq!(p.turn_on, set(&[0]));
        assert_eq!(sink.count("append"), 1);
        assert_eq!(sink.count("update"), 0);

        t.hub.set_mode(0, OverrideMode::ForcedOff).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        r.tick().await;
        assert_eq!(sink.count("update"), 1);

        // Back to auto with the valve still open starts a new run.
        t.hub.set_mode(0, OverrideMode::Auto).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        r.tick().await;
        assert_eq!(sink.count("append"), 2);
        assert_eq!(sink.count("update"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn releasing_a_forced_pump_in_its_forced_state_logs_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let t = test_hub_with_log(Some(crate::eventlog::PumpLog::new(sink.clone())));
        t.hub.set_db_log(true).await.unwrap();
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();
        let mut r = reconciler(&t);
        r.tick().await;

        t.hub.set_mode(0, OverrideMode::ForcedOff).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let p = r.tick().await;
        assert_eq!(p.turn_off, set(&[0]));

        t.hub.set_mode(0, OverrideMode::Auto).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let p = r.tick().await;
        assert_eq!(p.turn_off, set(&[0]));

        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let t = test_hub();
        t.valves.set(0, true);
        t.hub.add_pump(spec("Well", "10.0.0.1", &[0])).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconciler(&t).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(t.driver.sets(), vec![("10.0.0.1".to_string(), true)]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
