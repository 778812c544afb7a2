//! Traffic Splitter: programs a weighted split between two WorkloadHandles
//! behind a single Service and hands back the dwell deadline for the shift
//! just applied (SPEC_FULL §4.3, §7, §9). Grounded in the Gateway-API
//! weighted-backend-ref patching pattern (`patch_httproute_weights`,
//! `build_gateway_api_backend_refs`) used for canary/blue-green traffic
//! routing elsewhere in this ecosystem, generalized from a Gateway-API
//! specific patch to a call through `OrchestratorGateway::program_route`.
//!
//! This splitter does not sleep: SPEC_FULL §9 models a dwell as a
//! persisted `(attemptId, resumeAt)` record the reconciler's own tick
//! picks back up, not a blocking wait inside one strategy step (the
//! reconciler ticks every declared service in a single loop iteration, so
//! a real sleep here would stall every other service sharing that tick).
//! Callers store the returned `resume_at` on the attempt and re-check it
//! before applying the next step.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::GatewayError;
use crate::gateway::{OrchestratorGateway, RouteBackend, RouteProgram, WorkloadHandle};

/// Direction of the most recent shift for a service, used to decide whether
/// a new shift may pre-empt an in-flight dwell (SPEC_FULL §4.3: "a new shift
/// may pre-empt an in-flight dwell iff it moves weight in the same direction").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftDirection {
    Increasing,
    Decreasing,
    Flat,
}

fn direction(from: u8, to: u8) -> ShiftDirection {
    match to.cmp(&from) {
        std::cmp::Ordering::Greater => ShiftDirection::Increasing,
        std::cmp::Ordering::Less => ShiftDirection::Decreasing,
        std::cmp::Ordering::Equal => ShiftDirection::Flat,
    }
}

struct InFlightShift {
    direction: ShiftDirection,
    current_weight: u8,
}

pub struct TrafficSplitter<'g> {
    gateway: &'g dyn OrchestratorGateway,
    in_flight: Mutex<Option<InFlightShift>>,
}

impl<'g> TrafficSplitter<'g> {
    pub fn new(gateway: &'g dyn OrchestratorGateway) -> Self {
        Self {
            gateway,
            in_flight: Mutex::new(None),
        }
    }

    /// Applies `green_weight` (0-100) atomically and returns the instant this
    /// dwell completes (`now + dwell`). Callers must not apply a further
    /// shift for this attempt before that instant (SPEC_FULL §9's
    /// `resumeAt`). If a shift is already in flight in the same direction,
    /// this call pre-empts it by overwriting the recorded in-flight state
    /// before applying the new weight.
    pub async fn shift(
        &self,
        service: &str,
        blue: WorkloadHandle,
        green: WorkloadHandle,
        green_weight: u8,
        dwell: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, GatewayError> {
        let current_weight = {
            let guard = self.in_flight.lock().unwrap();
            guard.as_ref().map(|s| s.current_weight).unwrap_or(0)
        };
        let new_direction = direction(current_weight, green_weight);

        {
            let mut guard = self.in_flight.lock().unwrap();
            if let Some(existing) = guard.as_ref() {
                if existing.direction != new_direction && existing.direction != ShiftDirection::Flat {
                    info!(
                        service,
                        from = current_weight,
                        to = green_weight,
                        "traffic shift direction reversed; pre-empting in-flight dwell"
                    );
                }
            }
            *guard = Some(InFlightShift {
                direction: new_direction,
                current_weight: green_weight,
            });
        }

        let route = RouteProgram {
            service: service.to_string(),
            backends: vec![
                RouteBackend {
                    handle: blue,
                    weight: 100 - green_weight,
                },
                RouteBackend {
                    handle: green,
                    weight: green_weight,
                },
            ],
            ports: vec![],
        };
        info!(service, green_weight, "programming traffic split");
        self.gateway.program_route(route).await?;

        let resume_at = now + chrono::Duration::from_std(dwell).unwrap_or(chrono::Duration::zero());
        if resume_at <= now {
            *self.in_flight.lock().unwrap() = None;
        }
        Ok(resume_at)
    }
}
