//! # Constants
//!
//! Names, annotation keys and default values shared by the operator and the webhook.

/// Name of the single `RunOnceDurationOverride` instance the operator acts on
pub const DEFAULT_SINGLETON_NAME: &str = "cluster";

/// Namespace the webhook operand is installed into
pub const DEFAULT_OPERAND_NAMESPACE: &str = "run-once-duration-override";

/// Default webhook image
pub const DEFAULT_OPERAND_IMAGE: &str =
    "quay.io/openshift/run-once-duration-override-webhook:latest";

/// Default operand version reported in status
pub const DEFAULT_OPERAND_VERSION: &str = "1.0.0";

/// Default webhook replica count
pub const DEFAULT_OPERAND_REPLICAS: i32 = 2;

/// Base name shared by the operand objects
pub const OPERAND_NAME: &str = "runoncedurationoverride";

/// Label applied to every object the operator owns
pub const OPERAND_APP_LABEL: &str = "app";

/// Service account the operand pods run as (provisioned with the operator bundle)
pub const OPERAND_SERVICE_ACCOUNT: &str = "runoncedurationoverride";

/// Configuration ConfigMap name
pub const CONFIGURATION_CONFIGMAP_NAME: &str = "runoncedurationoverride-configuration";

/// Key inside the configuration ConfigMap holding the YAML document
pub const CONFIGURATION_KEY: &str = "configuration.yaml";

/// CA bundle ConfigMap name
pub const SERVICE_CA_CONFIGMAP_NAME: &str = "runoncedurationoverride-service-serving-ca";

/// Key inside the CA bundle ConfigMap
pub const SERVICE_CA_KEY: &str = "service-ca.crt";

/// Serving certificate secret name
pub const SERVING_CERT_SECRET_NAME: &str = "server-serving-cert-runoncedurationoverride";

/// Secret keys for the serving material
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

/// Secret key holding the CA replaced by the most recent rotation
pub const PREVIOUS_CA_CERT_KEY: &str = "ca-previous.crt";

/// Service port exposed to the API server
pub const SERVICE_PORT: i32 = 443;

/// Port the webhook container listens on
pub const WEBHOOK_CONTAINER_PORT: i32 = 9443;

/// Admission API group served by the webhook through the aggregator
pub const ADMISSION_GROUP: &str = "admission.runoncedurationoverride.openshift.io";

/// Admission API version
pub const ADMISSION_VERSION: &str = "v1";

/// Admission resource (plural) exposed under the aggregated group
pub const ADMISSION_RESOURCE: &str = "runoncedurationoverrides";

/// Kind of the configuration document stored in the configuration ConfigMap
pub const CONFIGURATION_KIND: &str = "RunOnceDurationOverrideConfig";

/// MutatingWebhookConfiguration name (also the webhook entry name)
pub const WEBHOOK_CONFIGURATION_NAME: &str =
    "runoncedurationoverrides.admission.runoncedurationoverride.openshift.io";

/// Namespace label that opts a namespace in to mutation
pub const NAMESPACE_ENABLED_LABEL: &str =
    "runoncedurationoverrides.admission.runoncedurationoverride.openshift.io/enabled";

/// Mount path of the serving certificate inside the webhook pod
pub const SERVING_CERT_MOUNT_PATH: &str = "/var/serving-cert";

/// Mount path of the configuration inside the webhook pod
pub const CONFIGURATION_MOUNT_PATH: &str = "/var/run/configmaps/configuration";

/// Annotation carrying the digest of an object's desired shape
pub const DESIRED_HASH_ANNOTATION: &str =
    "runoncedurationoverride.operator.openshift.io/desired.hash";

/// Pod template annotation carrying the configuration digest
pub const CONFIGURATION_HASH_ANNOTATION: &str =
    "runoncedurationoverride.operator.openshift.io/configuration.hash";

/// Pod template annotation carrying the serving certificate digest
pub const SERVING_CERT_HASH_ANNOTATION: &str =
    "runoncedurationoverride.operator.openshift.io/servingcert.hash";

/// Serving certificate validity window annotations (RFC 3339)
pub const CERT_NOT_BEFORE_ANNOTATION: &str =
    "runoncedurationoverride.operator.openshift.io/certs-not-before";
pub const CERT_NOT_AFTER_ANNOTATION: &str =
    "runoncedurationoverride.operator.openshift.io/certs-not-after";
/// Expiry of the CA kept in the bundle after a rotation
pub const PREVIOUS_CA_NOT_AFTER_ANNOTATION: &str =
    "runoncedurationoverride.operator.openshift.io/previous-ca-not-after";

/// Field manager used for status writes
pub const FIELD_MANAGER: &str = "run-once-duration-override-operator";

/// Default serving certificate validity (days)
pub const DEFAULT_CERT_VALIDITY_DAYS: u64 = 365;

/// Default fraction of the validity window after which the certificate is rotated
pub const DEFAULT_CERT_REFRESH_FRACTION: f64 = 0.8;

/// Consecutive failed passes tolerated before `Available` flips to False
pub const DEFAULT_AVAILABLE_FAILURE_THRESHOLD: u32 = 3;

/// Upper bound for a single store operation (seconds)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Deployment rollout deadline (seconds)
pub const DEFAULT_ROLLOUT_PROGRESS_DEADLINE_SECS: i32 = 600;

/// Requeue interval while children are still converging (seconds)
pub const DEFAULT_NOT_READY_REQUEUE_SECS: u64 = 10;

/// Periodic resync interval once everything is available (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Fibonacci backoff bounds for failed passes (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Watch stream backoff bounds (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30000;

/// Watch stream restart delay after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Watch stream restart delay after the stream ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Webhook call timeout registered with the API server (seconds)
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: i32 = 5;

/// Operator metrics and probe port
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// HTTP server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// HTTP server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
