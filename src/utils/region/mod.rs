pub mod catalog;
pub mod fetcher;
pub mod flags;
pub mod parser;
pub mod source;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Id of the synthetic loopback region.
pub const LOCAL_REGION_ID: &str = "local";
pub const US_EAST_1: &str = "us-east-1";
/// Explicit regional endpoint used for S3 in us-east-1 instead of the global one.
pub const S3_US_EAST_1_REGIONAL_ENDPOINT: &str = "https://s3-external-1.amazonaws.com";

/// Service abbreviations used as keys of a region's endpoint map.
pub struct ServiceAbbreviations;

impl ServiceAbbreviations {
    pub const AUTOSCALING: &'static str = "AutoScaling";
    pub const BEANSTALK: &'static str = "ElasticBeanstalk";
    pub const CLOUD_FORMATION: &'static str = "CloudFormation";
    pub const CLOUDFRONT: &'static str = "CloudFront";
    pub const CODECOMMIT: &'static str = "CodeCommit";
    pub const CODE_DEPLOY: &'static str = "CodeDeploy";
    pub const CODESTAR: &'static str = "CodeStar";
    pub const DYNAMODB: &'static str = "DynamoDB";
    pub const EC2: &'static str = "EC2";
    pub const ELB: &'static str = "ELB";
    pub const IAM: &'static str = "IAM";
    pub const KMS: &'static str = "KMS";
    pub const LAMBDA: &'static str = "Lambda";
    pub const LOGS: &'static str = "Logs";
    pub const OPSWORKS: &'static str = "OpsWorks";
    pub const RDS: &'static str = "RDS";
    pub const S3: &'static str = "S3";
    pub const SIMPLEDB: &'static str = "SimpleDB";
    pub const SNS: &'static str = "SNS";
    pub const SQS: &'static str = "SQS";
    pub const STS: &'static str = "STS";
}

/// Top-level credential/endpoint namespace a region belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    AwsCloud,
    UsGovCloud,
    ChinaCloud,
}

impl Partition {
    /// Region used to sign requests against global services in this partition.
    pub fn global_signing_region(&self) -> &'static str {
        match self {
            Partition::AwsCloud => US_EAST_1,
            Partition::UsGovCloud => "us-gov-west-1",
            Partition::ChinaCloud => "cn-north-1",
        }
    }
}

impl FromStr for Partition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "isawsaccount" => Ok(Partition::AwsCloud),
            "isgovcloudaccount" => Ok(Partition::UsGovCloud),
            "ischinaaccount" => Ok(Partition::ChinaCloud),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    name: String,
    service_id: Option<String>,
    endpoint: String,
    signer_override: Option<String>,
}

impl Service {
    pub fn new(name: &str, service_id: Option<&str>, endpoint: &str, signer_override: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            service_id: service_id.map(|s| s.to_string()),
            endpoint: endpoint.to_string(),
            signer_override: signer_override.map(|s| s.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id used for request signing, when it can't be derived from the endpoint.
    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn signer_override(&self) -> Option<&str> {
        self.signer_override.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    id: String,
    display_name: String,
    flag_icon_path: Option<String>,
    partition: Option<Partition>,
    // Keyed by service abbreviation.
    services: BTreeMap<String, Service>,
}

impl Region {
    pub fn new(id: &str, display_name: &str, flag_icon_path: Option<&str>, partition: Option<Partition>) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            flag_icon_path: flag_icon_path.map(|s| s.to_string()),
            partition,
            services: BTreeMap::new(),
        }
    }

    /// The loopback region that locally running test services register into.
    pub fn local() -> Self {
        Self::new(LOCAL_REGION_ID, "Local (localhost)", None, None)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn flag_icon_path(&self) -> Option<&str> {
        self.flag_icon_path.as_deref()
    }

    pub fn partition(&self) -> Option<Partition> {
        self.partition
    }

    pub fn is_local(&self) -> bool {
        self.id == LOCAL_REGION_ID
    }

    pub fn is_service_supported(&self, service_abbreviation: &str) -> bool {
        self.services.contains_key(service_abbreviation)
    }

    pub fn service(&self, service_abbreviation: &str) -> Option<&Service> {
        self.services.get(service_abbreviation)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service_endpoint(&self, service_abbreviation: &str) -> Option<&str> {
        self.services.get(service_abbreviation).map(|service| service.endpoint())
    }

    /// Map of service abbreviation to endpoint URL.
    pub fn service_endpoints(&self) -> BTreeMap<&str, &str> {
        self.services
            .iter()
            .map(|(name, service)| (name.as_str(), service.endpoint()))
            .collect()
    }

    pub fn global_signing_region(&self) -> &str {
        self.partition
            .unwrap_or(Partition::AwsCloud)
            .global_signing_region()
    }

    /// Inserts or replaces the service keyed by its name.
    pub(crate) fn put_service(&mut self, service: Service) {
        self.services.insert(service.name.clone(), service);
    }

    /// Points an existing service at a new endpoint, or adds a bare one.
    pub(crate) fn put_service_endpoint(&mut self, service_abbreviation: &str, endpoint: &str) {
        match self.services.get_mut(service_abbreviation) {
            Some(service) => service.endpoint = endpoint.to_string(),
            None => self.put_service(Service::new(service_abbreviation, None, endpoint, None)),
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
