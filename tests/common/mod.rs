use std::collections::BTreeMap;

use orbitctl::model::{
    AutoscaleSpec, CanaryParams, EnvValue, HealthCheckSpec, HealthGateSpec, ResourceSpec,
    ServiceSpec, StrategyKind, StrategySpec,
};

pub fn rolling_spec(tenant_id: &str, name: &str, image: &str) -> ServiceSpec {
    ServiceSpec {
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        image: image.to_string(),
        ports: vec![8080],
        env: BTreeMap::<String, EnvValue>::new(),
        resources: ResourceSpec {
            cpu: "100m".into(),
            memory: "256Mi".into(),
            cpu_limit: None,
            memory_limit: None,
        },
        autoscale: AutoscaleSpec { min: 2, max: 2, cpu: 70, rps: 100 },
        health_check: HealthCheckSpec {
            path: "/healthz".into(),
            port: 8080,
            initial_delay_seconds: 0,
            period_seconds: 10,
        },
        strategy: StrategySpec { kind: StrategyKind::Rolling, canary: None::<CanaryParams>, blue_green: None },
        health_gate: HealthGateSpec {
            enabled: true,
            max_error_rate: 0.01,
            max_p95_latency_ms: 500,
            min_success_rate: 0.99,
            window_seconds: 60,
            failure_threshold: 1,
        },
    }
}

pub fn canary_spec(tenant_id: &str, name: &str, image: &str) -> ServiceSpec {
    let mut spec = rolling_spec(tenant_id, name, image);
    spec.strategy = StrategySpec {
        kind: StrategyKind::Canary,
        canary: Some(CanaryParams {
            initial_weight: 10,
            // Zero dwell: these fixtures drive ServiceReconciler::tick in a
            // tight loop and only exercise the end-to-end state sequence, not
            // dwell timing (that's covered by the strategy unit tests).
            observation_time_seconds: 0,
            auto_promote: true,
        }),
        blue_green: None,
    };
    spec
}
