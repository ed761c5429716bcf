//! Service port aggregation
//!
//! Endpoints from every container are merged by port number into one
//! service. When several endpoints share a port the most open exposure wins
//! (public over internal over none); ports whose aggregate exposure is `none`
//! are left out of the service entirely.

use crate::devfile::{Devfile, Endpoint, Exposure};
use indexmap::IndexMap;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A port after merging every endpoint that declares it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPort {
    pub port: i32,
    /// Transport of the first endpoint declaring the port
    pub protocol: String,
    pub exposure: Exposure,
    /// Names of all endpoints sharing the port, in declaration order
    pub endpoints: Vec<String>,
}

impl AggregatedPort {
    fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            port: endpoint.target_port,
            protocol: endpoint.protocol.transport().to_string(),
            exposure: endpoint.exposure,
            endpoints: vec![endpoint.name.clone()],
        }
    }

    fn merge(&mut self, endpoint: &Endpoint) {
        if endpoint.exposure.rank() > self.exposure.rank() {
            self.exposure = endpoint.exposure;
        }
        self.endpoints.push(endpoint.name.clone());
    }

    /// Service port name, `port-<number>`
    pub fn service_port_name(&self) -> String {
        format!("port-{}", self.port)
    }
}

/// Merge all container endpoints by port, in first-declared order
pub fn aggregate_ports(devfile: &Devfile) -> Vec<AggregatedPort> {
    let mut ports: IndexMap<i32, AggregatedPort> = IndexMap::new();
    for (_, container) in devfile.containers() {
        for endpoint in &container.endpoints {
            ports
                .entry(endpoint.target_port)
                .and_modify(|port| port.merge(endpoint))
                .or_insert_with(|| AggregatedPort::from_endpoint(endpoint));
        }
    }
    ports.into_values().collect()
}

/// Service ports for every exposed port
pub fn service_ports(devfile: &Devfile) -> Vec<ServicePort> {
    aggregate_ports(devfile)
        .into_iter()
        .filter(|port| port.exposure != Exposure::None)
        .map(|port| ServicePort {
            name: Some(port.service_port_name()),
            port: port.port,
            target_port: Some(IntOrString::Int(port.port)),
            protocol: Some(port.protocol.clone()),
            ..Default::default()
        })
        .collect()
}

/// Build the component service, or `None` when no port is exposed
pub fn synthesize_service(
    devfile: &Devfile,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Option<Service> {
    let ports = service_ports(devfile);
    if ports.is_empty() {
        debug!(component = %name, "No exposed ports, skipping service");
        return None;
    }

    Some(Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels.clone()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::component_labels;
    use crate::devfile::{Component, ContainerComponent, EndpointProtocol};

    fn devfile_with(endpoints: Vec<Vec<Endpoint>>) -> Devfile {
        let components = endpoints
            .into_iter()
            .enumerate()
            .map(|(i, endpoints)| {
                let mut container = ContainerComponent::new("busybox");
                container.endpoints = endpoints;
                Component::container(format!("c{}", i), container)
            })
            .collect();
        Devfile {
            components,
            ..Default::default()
        }
    }

    #[test]
    fn test_none_exposure_is_excluded() {
        let devfile = devfile_with(vec![vec![
            Endpoint::new("web", 8080),
            Endpoint::new("debug", 3000).with_exposure(Exposure::None),
        ]]);
        let ports = service_ports(&devfile);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("port-8080"));
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn test_shared_port_takes_most_open_exposure() {
        let devfile = devfile_with(vec![
            vec![Endpoint::new("a", 9000).with_exposure(Exposure::None)],
            vec![Endpoint::new("b", 9000).with_exposure(Exposure::Internal)],
        ]);
        let aggregated = aggregate_ports(&devfile);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].exposure, Exposure::Internal);
        assert_eq!(aggregated[0].endpoints, vec!["a", "b"]);
        assert_eq!(service_ports(&devfile).len(), 1);
    }

    #[test]
    fn test_public_and_internal_aggregate_to_public() {
        for (first, second) in [
            (Exposure::Internal, Exposure::Public),
            (Exposure::Public, Exposure::Internal),
        ] {
            let devfile = devfile_with(vec![
                vec![Endpoint::new("a", 7000).with_exposure(first)],
                vec![Endpoint::new("b", 7000).with_exposure(second)],
            ]);
            let aggregated = aggregate_ports(&devfile);
            assert_eq!(aggregated.len(), 1);
            assert_eq!(aggregated[0].exposure, Exposure::Public);
            assert_eq!(service_ports(&devfile).len(), 1);
        }
    }

    #[test]
    fn test_public_is_not_downgraded() {
        let devfile = devfile_with(vec![
            vec![Endpoint::new("a", 8080)],
            vec![Endpoint::new("b", 8080).with_exposure(Exposure::None)],
        ]);
        assert_eq!(aggregate_ports(&devfile)[0].exposure, Exposure::Public);
    }

    #[test]
    fn test_first_endpoint_sets_protocol_and_order() {
        let mut udp = Endpoint::new("dns", 53);
        udp.protocol = EndpointProtocol::Udp;
        let devfile = devfile_with(vec![vec![udp, Endpoint::new("web", 80)]]);
        let ports = service_ports(&devfile);
        assert_eq!(ports[0].protocol.as_deref(), Some("UDP"));
        assert_eq!(ports[1].name.as_deref(), Some("port-80"));
    }

    #[test]
    fn test_no_exposed_ports_means_no_service() {
        let devfile = devfile_with(vec![vec![
            Endpoint::new("hidden", 5000).with_exposure(Exposure::None)
        ]]);
        assert!(synthesize_service(&devfile, "web", &component_labels("web")).is_none());
    }

    #[test]
    fn test_service_selects_component_labels() {
        let devfile = devfile_with(vec![vec![Endpoint::new("web", 8080)]]);
        let labels = component_labels("web");
        let service = synthesize_service(&devfile, "web", &labels).unwrap();
        assert_eq!(service.metadata.name.as_deref(), Some("web"));
        assert_eq!(service.spec.unwrap().selector, Some(labels));
    }
}
