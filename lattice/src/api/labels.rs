//! Label keys and finalizer names

/// Domain form of the secret's path subcomponent
pub const SECRET_PATH: &str = "secret-path";

/// Definition hash of a container build, used for dedup
pub const CONTAINER_BUILD_DEFINITION_HASH: &str = "container-build-definition-hash";

pub const SERVICE_ID: &str = "service-id";

pub const SERVICE_PATH: &str = "service-path";

pub const JOB_ID: &str = "job-id";

pub const JOB_PATH: &str = "job-path";

/// Service a dedicated node pool belongs to
pub const NODE_POOL_SERVICE_DEDICATED_ID: &str = "node-pool-service-dedicated-id";

/// Domain form of the subcomponent declaring a shared node pool
pub const NODE_POOL_SYSTEM_SHARED_PATH: &str = "node-pool-system-shared-path";

pub const INSTANCE_GENERATION: &str = "instance-generation";

pub const SYSTEM_DEFINITION_VERSION: &str = "system-definition-version";

pub const DEPLOY_ID: &str = "deploy-id";

pub const BUILD_ID: &str = "build-id";

pub const TEMPLATE_REPOSITORY_URL_HASH: &str = "template-repository-url-hash";

pub const TEMPLATE_COMMIT: &str = "template-commit";

pub const TEMPLATE_FILE_HASH: &str = "template-file-hash";

pub const BUILD_FINALIZER: &str = "lattice.build-controller";

pub const SYSTEM_FINALIZER: &str = "lattice.system-controller";

pub const SERVICE_FINALIZER: &str = "lattice.service-controller";

pub const JOB_FINALIZER: &str = "lattice.job-controller";

pub const NODE_POOL_FINALIZER: &str = "lattice.node-pool-controller";
