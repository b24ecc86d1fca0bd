//! Periodic timers armed by form-fill environments.

use std::sync::Arc;
use std::time::Duration;

use pdfhost_proto::{Event, Reference};
use rustc_hash::FxHashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::spawn::{TaskClass, spawn};

/// Receives timer events.
pub(crate) type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Delivers [`Event::TimerFired`] for every armed timer until it is disarmed.
pub(crate) struct TimerWheel {
	sink: EventSink,
	timers: FxHashMap<(Reference, i32), CancellationToken>,
}

impl TimerWheel {
	pub(crate) fn new(sink: EventSink) -> Self {
		Self {
			sink,
			timers: FxHashMap::default(),
		}
	}

	pub(crate) fn arm(&mut self, form: Reference, timer_id: i32, interval: Duration) {
		self.disarm(form, timer_id);
		let token = CancellationToken::new();
		let cancelled = token.clone();
		let sink = Arc::clone(&self.sink);
		let period = interval.max(MIN_INTERVAL);

		spawn(TaskClass::Background, async move {
			let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				tokio::select! {
					biased;
					_ = cancelled.cancelled() => break,
					_ = ticker.tick() => sink(Event::TimerFired { form, timer_id }),
				}
			}
		});

		tracing::debug!(%form, timer_id, period_ms = period.as_millis() as u64, "timers.armed");
		self.timers.insert((form, timer_id), token);
	}

	pub(crate) fn disarm(&mut self, form: Reference, timer_id: i32) {
		if let Some(token) = self.timers.remove(&(form, timer_id)) {
			token.cancel();
			tracing::debug!(%form, timer_id, "timers.disarmed");
		}
	}

	pub(crate) fn disarm_all(&mut self) {
		for (_, token) in self.timers.drain() {
			token.cancel();
		}
	}

	#[cfg(test)]
	pub(crate) fn armed(&self) -> usize {
		self.timers.len()
	}
}

impl Drop for TimerWheel {
	fn drop(&mut self) {
		self.disarm_all();
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;
	use pdfhost_proto::{InstanceId, RefKind};

	use super::*;

	#[tokio::test]
	async fn armed_timers_tick_until_disarmed() {
		let events = Arc::new(Mutex::new(Vec::new()));
		let seen = Arc::clone(&events);
		let mut wheel = TimerWheel::new(Arc::new(move |event| seen.lock().push(event)));
		let form = Reference::new(RefKind::FormHandle, 1, InstanceId(1));

		wheel.arm(form, 7, Duration::from_millis(5));
		assert_eq!(wheel.armed(), 1);
		tokio::time::sleep(Duration::from_millis(40)).await;
		wheel.disarm(form, 7);
		tokio::time::sleep(Duration::from_millis(10)).await;

		let fired = events.lock().len();
		assert!(fired >= 2, "expected several ticks, got {fired}");
		assert!(events.lock().iter().all(|event| *event == Event::TimerFired { form, timer_id: 7 }));

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(events.lock().len(), fired);
		assert_eq!(wheel.armed(), 0);
	}
}
