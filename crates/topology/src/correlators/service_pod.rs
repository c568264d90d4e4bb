use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use tokio::sync::mpsc;

use super::{Correlator, PodLabelCorrelation, ServiceSelectorCorrelation};
use crate::collectors::RunContext;
use crate::model::{Relation, RelationType};
use crate::Result;

/// Routes services to the pods their selector matches and to the pods
/// listed in their endpoints.
#[derive(Debug)]
pub struct ServicePodCorrelator {
    pods: mpsc::Receiver<PodLabelCorrelation>,
    services: mpsc::Receiver<ServiceSelectorCorrelation>,
}

impl ServicePodCorrelator {
    pub fn new(
        pods: mpsc::Receiver<PodLabelCorrelation>,
        services: mpsc::Receiver<ServiceSelectorCorrelation>,
    ) -> Self {
        Self { pods, services }
    }
}

#[async_trait::async_trait]
impl Correlator for ServicePodCorrelator {
    fn name(&self) -> &'static str {
        "service-pod"
    }

    async fn run(mut self: Box<Self>, ctx: &RunContext) -> Result<()> {
        let mut by_namespace: HashMap<String, Vec<PodLabelCorrelation>> = HashMap::new();
        while let Some(pod) = self.pods.recv().await {
            by_namespace.entry(pod.namespace.clone()).or_default().push(pod);
        }

        while let Some(service) = self.services.recv().await {
            let pods = by_namespace
                .get(&service.namespace)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let mut targets = IndexSet::new();
            for pod in pods {
                if selector_matches(&service.selector, &pod.labels) {
                    targets.insert(pod.pod_external_id.as_str());
                }
            }
            for endpoint in &service.endpoints {
                let known = pods.iter().find(|p| p.name == endpoint.name);
                match known {
                    Some(pod) => {
                        targets.insert(pod.pod_external_id.as_str());
                    }
                    None => log::debug!(service = service.service_external_id.as_str(), pod = endpoint.name.as_str(); "endpoint targets an unknown pod"),
                }
            }

            for pod in targets {
                ctx.relation(Relation::new(
                    service.service_external_id.as_str(),
                    pod,
                    RelationType::RoutesTo,
                ))
                .await;
            }
        }
        Ok(())
    }
}

/// A selector matches when it is non-empty and every key is present in
/// `labels` with an equal value.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClusterState;
    use crate::collectors::testing::{config, Harness, Output};
    use crate::correlators::EndpointTarget;
    use proptest::prelude::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn pod(namespace: &str, name: &str, pairs: &[(&str, &str)]) -> PodLabelCorrelation {
        PodLabelCorrelation {
            pod_external_id: format!("urn:kubernetes:/mycluster:{}:pod/{}", namespace, name),
            namespace: namespace.into(),
            name: name.into(),
            labels: labels(pairs),
        }
    }

    async fn correlate(
        pods: Vec<PodLabelCorrelation>,
        services: Vec<ServiceSelectorCorrelation>,
    ) -> Output {
        let h = Harness::new(ClusterState::default(), config());
        let (pod_tx, pod_rx) = mpsc::channel(16);
        let (svc_tx, svc_rx) = mpsc::channel(16);
        for p in pods {
            pod_tx.send(p).await.unwrap();
        }
        for s in services {
            svc_tx.send(s).await.unwrap();
        }
        drop((pod_tx, svc_tx));
        Box::new(ServicePodCorrelator::new(pod_rx, svc_rx))
            .run(&h.ctx)
            .await
            .unwrap();
        h.output()
    }

    #[tokio::test]
    async fn selector_routes_within_the_namespace() {
        let out = correlate(
            vec![
                pod("ns", "p1", &[("app", "a"), ("tier", "web")]),
                pod("ns", "p2", &[("app", "b")]),
                pod("other", "p3", &[("app", "a")]),
            ],
            vec![ServiceSelectorCorrelation {
                service_external_id: "urn:kubernetes:/mycluster:ns:service/s".into(),
                namespace: "ns".into(),
                selector: labels(&[("app", "a")]),
                endpoints: Vec::new(),
            }],
        )
        .await;

        assert_eq!(out.relations.len(), 1);
        assert!(out.has_relation(
            "urn:kubernetes:/mycluster:ns:service/s",
            "urn:kubernetes:/mycluster:ns:pod/p1",
            RelationType::RoutesTo
        ));
    }

    #[tokio::test]
    async fn endpoints_and_selector_are_deduplicated() {
        let out = correlate(
            vec![pod("ns", "p1", &[("app", "a")]), pod("ns", "p2", &[])],
            vec![ServiceSelectorCorrelation {
                service_external_id: "urn:kubernetes:/mycluster:ns:service/s".into(),
                namespace: "ns".into(),
                selector: labels(&[("app", "a")]),
                endpoints: vec![
                    EndpointTarget {
                        namespace: "ns".into(),
                        name: "p1".into(),
                    },
                    EndpointTarget {
                        namespace: "ns".into(),
                        name: "p2".into(),
                    },
                    EndpointTarget {
                        namespace: "ns".into(),
                        name: "gone".into(),
                    },
                ],
            }],
        )
        .await;

        let targets: Vec<_> = out.relations.iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "urn:kubernetes:/mycluster:ns:pod/p1",
                "urn:kubernetes:/mycluster:ns:pod/p2"
            ]
        );
    }

    #[test]
    fn empty_selector_matches_nothing() {
        assert!(!selector_matches(&BTreeMap::new(), &labels(&[("app", "a")])));
        assert!(!selector_matches(&BTreeMap::new(), &BTreeMap::new()));
    }

    proptest! {
        #[test]
        fn selector_matches_its_own_superset(
            selector in prop::collection::btree_map("[a-z]{1,4}", "[a-z]{0,3}", 1..4),
            extra in prop::collection::btree_map("[A-Z]{1,4}", "[a-z]{0,3}", 0..4),
        ) {
            let mut labels = extra;
            labels.extend(selector.clone());
            prop_assert!(selector_matches(&selector, &labels));

            let (key, value) = selector.iter().next().unwrap();
            labels.insert(key.clone(), format!("{}-changed", value));
            prop_assert!(!selector_matches(&selector, &labels));
        }
    }
}
