//! # Child Kinds
//!
//! The seven objects that make up the webhook installation.

use kube::core::{ApiResource, GroupVersionKind};

use crate::controller::conditions::Reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    /// ConfigMap carrying the admission configuration
    Configuration,
    /// ConfigMap carrying the CA bundle
    ServiceCaBundle,
    Service,
    /// TLS secret with the serving certificate
    ServingCertSecret,
    Deployment,
    ApiService,
    MutatingWebhook,
}

impl ChildKind {
    /// Every child, in creation order
    pub const ALL: [ChildKind; 7] = [
        ChildKind::Configuration,
        ChildKind::ServiceCaBundle,
        ChildKind::Service,
        ChildKind::ServingCertSecret,
        ChildKind::Deployment,
        ChildKind::ApiService,
        ChildKind::MutatingWebhook,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Configuration => "configuration",
            ChildKind::ServiceCaBundle => "service-ca-bundle",
            ChildKind::Service => "service",
            ChildKind::ServingCertSecret => "serving-cert-secret",
            ChildKind::Deployment => "deployment",
            ChildKind::ApiService => "apiservice",
            ChildKind::MutatingWebhook => "mutating-webhook",
        }
    }

    fn gvk(&self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            ChildKind::Configuration | ChildKind::ServiceCaBundle => {
                ("", "v1", "ConfigMap", "configmaps")
            }
            ChildKind::Service => ("", "v1", "Service", "services"),
            ChildKind::ServingCertSecret => ("", "v1", "Secret", "secrets"),
            ChildKind::Deployment => ("apps", "v1", "Deployment", "deployments"),
            ChildKind::ApiService => ("apiregistration.k8s.io", "v1", "APIService", "apiservices"),
            ChildKind::MutatingWebhook => (
                "admissionregistration.k8s.io",
                "v1",
                "MutatingWebhookConfiguration",
                "mutatingwebhookconfigurations",
            ),
        }
    }

    /// Kubernetes kind name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.gvk().2
    }

    #[must_use]
    pub fn api_version(&self) -> String {
        let (group, version, _, _) = self.gvk();
        if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        }
    }

    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        let (group, version, kind, plural) = self.gvk();
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
    }

    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ChildKind::ApiService | ChildKind::MutatingWebhook)
    }

    /// Condition reason reported while this child is not ready
    #[must_use]
    pub fn not_ready_reason(&self) -> Reason {
        match self {
            ChildKind::Deployment => Reason::DeploymentNotReady,
            ChildKind::ServingCertSecret | ChildKind::ServiceCaBundle => Reason::CertNotAvailable,
            ChildKind::ApiService | ChildKind::MutatingWebhook | ChildKind::Service => {
                Reason::AdmissionWebhookNotAvailable
            }
            ChildKind::Configuration => Reason::ConfigurationCheckFailed,
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
