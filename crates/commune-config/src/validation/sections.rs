use super::helpers::validate_range;
use crate::schema::CommuneConfig;

pub(super) fn validate_backend(errors: &mut Vec<String>, config: &CommuneConfig) {
    let backend = &config.backend;
    validate_range(
        errors,
        "backend.request_timeout_secs",
        backend.request_timeout_secs,
        1,
        300,
    );
    if let Some(url) = backend.base_url.as_deref() {
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(format!("backend.base_url = {url:?} must start with http:// or https://"));
        }
    }
    if backend
        .project_ref
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '-')
    {
        errors.push(format!(
            "backend.project_ref = {:?} contains invalid characters",
            backend.project_ref
        ));
    }
}

pub(super) fn validate_realtime(errors: &mut Vec<String>, config: &CommuneConfig) {
    let rt = &config.realtime;
    validate_range(errors, "realtime.heartbeat_interval", rt.heartbeat_interval, 5, 120);
    validate_range(errors, "realtime.reconnect_delay", rt.reconnect_delay, 1, 60);
    if rt.max_reconnect_delay < rt.reconnect_delay {
        errors.push(format!(
            "realtime.max_reconnect_delay = {} is less than reconnect_delay = {}",
            rt.max_reconnect_delay, rt.reconnect_delay
        ));
    }
}

pub(super) fn validate_notifications(errors: &mut Vec<String>, config: &CommuneConfig) {
    validate_range(
        errors,
        "notifications.page_size",
        config.notifications.page_size,
        1,
        1000,
    );
}

pub(super) fn validate_presence(errors: &mut Vec<String>, config: &CommuneConfig) {
    let p = &config.presence;
    validate_range(errors, "presence.heartbeat_interval", p.heartbeat_interval, 5, 600);
    if p.sweep_interval < p.heartbeat_interval {
        errors.push(format!(
            "presence.sweep_interval = {} is shorter than heartbeat_interval = {}",
            p.sweep_interval, p.heartbeat_interval
        ));
    }
    if p.stale_after <= p.heartbeat_interval {
        errors.push(format!(
            "presence.stale_after = {} must exceed heartbeat_interval = {}",
            p.stale_after, p.heartbeat_interval
        ));
    }
}

pub(super) fn validate_geolocation(errors: &mut Vec<String>, config: &CommuneConfig) {
    let geo = &config.geolocation;
    if geo.enabled && !geo.url.starts_with("http://") && !geo.url.starts_with("https://") {
        errors.push(format!(
            "geolocation.url = {:?} must be an http(s) URL",
            geo.url
        ));
    }
}
