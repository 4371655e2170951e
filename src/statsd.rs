//! Minimal statsd client with telegraf-style `key=value` tags:
//! `<https://github.com/influxdata/telegraf/tree/master/plugins/inputs/statsd>`.

use std::collections::HashMap;
use std::fmt::Display;
use std::net::UdpSocket;

#[derive(Clone, Copy)]
enum MetricType {
    Gauge,
    Counter,
}

impl MetricType {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Gauge => "g",
            Self::Counter => "c",
        }
    }
}

pub struct StatsClient {
    socket: Option<UdpSocket>,
    dest: Option<(String, u16)>,
    tags: HashMap<String, String>,
}

impl StatsClient {
    /// Builds a client targeting `host:port`. Passing `None` for `host`
    /// disables sending entirely, mirroring the reference client's
    /// `(None, port)` destination sentinel.
    #[must_use]
    pub fn new(host: Option<&str>, port: u16, tags: HashMap<String, String>) -> Self {
        let socket = host.and(UdpSocket::bind("0.0.0.0:0").ok());
        Self {
            socket,
            dest: host.map(|h| (h.to_string(), port)),
            tags,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            socket: None,
            dest: None,
            tags: HashMap::new(),
        }
    }

    pub fn gauge(&self, metric: &str, value: impl Display, tags: Option<&HashMap<String, String>>) {
        self.send(metric, MetricType::Gauge, value, tags);
    }

    pub fn increment(&self, metric: &str, value: impl Display, tags: Option<&HashMap<String, String>>) {
        self.send(metric, MetricType::Counter, value, tags);
    }

    pub fn unexpected_exception(&self, where_: &str, exception: &str) {
        let mut tags = HashMap::new();
        tags.insert("exception".to_string(), exception.to_string());
        tags.insert("where".to_string(), where_.to_string());
        self.increment("exception", 1, Some(&tags));
    }

    fn send(&self, metric: &str, metric_type: MetricType, value: impl Display, tags: Option<&HashMap<String, String>>) {
        let (Some(socket), Some((host, port))) = (&self.socket, &self.dest) else {
            return;
        };

        let mut all_tags = self.tags.clone();
        if let Some(extra) = tags {
            all_tags.extend(extra.clone());
        }

        let mut tag_suffix = String::new();
        for (key, tag_value) in &all_tags {
            tag_suffix.push(',');
            tag_suffix.push_str(key);
            tag_suffix.push('=');
            tag_suffix.push_str(tag_value);
        }

        let payload = format!("{metric}{tag_suffix}:{value}|{}", metric_type.suffix());

        if let Err(error) = socket.send_to(payload.as_bytes(), (host.as_str(), *port)) {
            tracing::error!(%error, "unexpected exception in statsd send");
        }
    }
}
