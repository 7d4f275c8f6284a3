//! # Database Topology
//!
//! RDS-backed answers to two questions `setSecret` cannot answer from the
//! secret documents alone:
//!
//! 1. Is the host being rotated a read replica (or a reader endpoint) of
//!    the master secret's host? Rotating through a replica endpoint is
//!    legitimate; rotating an unrelated host is a configuration error.
//! 2. Where does an RDS-managed master secret actually live? Such secrets
//!    hold only `username`/`password`; the primary instance or cluster ARN
//!    sits in the secret's system tags and the endpoint comes from the
//!    `DescribeDBInstances`/`DescribeDBClusters` APIs.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_rds::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_rds::Client as RdsClient;
use tracing::warn;

use crate::document::SecretDocument;

/// System tag keys an RDS-managed master secret carries.
const INSTANCE_ARN_TAG: &str = "aws:rds:primarydbinstancearn";
const CLUSTER_ARN_TAG: &str = "aws:rds:primarydbclusterarn";

const MAX_DB_ARN_LENGTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("'{identifier}' did not match any RDS instance or cluster")]
    NotFound { identifier: String },

    #[error("'{arn}' is not a valid DB ARN, it exceeds the maximum length of {MAX_DB_ARN_LENGTH}")]
    ArnTooLong { arn: String },

    #[error("RDS API error: {0}")]
    Api(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// ARN of the primary database behind an RDS-managed master secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryDatabaseArn {
    Instance(String),
    Cluster(String),
}

impl PrimaryDatabaseArn {
    /// Extract the primary instance/cluster ARN from a secret's system
    /// tags. Returns `None` when the secret is not service-linked.
    pub fn from_tags(tags: &HashMap<String, String>) -> Result<Option<Self>, TopologyError> {
        let mut found = None;
        for (key, value) in tags {
            let arn = match key.to_lowercase().as_str() {
                k if k == INSTANCE_ARN_TAG => Self::Instance(value.clone()),
                k if k == CLUSTER_ARN_TAG => Self::Cluster(value.clone()),
                _ => continue,
            };
            if arn.arn().len() > MAX_DB_ARN_LENGTH {
                return Err(TopologyError::ArnTooLong {
                    arn: arn.arn().to_string(),
                });
            }
            found = Some(arn);
        }
        Ok(found)
    }

    pub fn arn(&self) -> &str {
        match self {
            Self::Instance(arn) | Self::Cluster(arn) => arn,
        }
    }
}

/// Connection parameters of a resolved primary database.
#[derive(Debug, Clone)]
pub struct PrimaryEndpoint {
    pub host: String,
    pub port: Option<u16>,
    pub engine: Option<String>,
}

/// Topology questions answered by an infrastructure API.
#[async_trait]
pub trait DatabaseTopology: Send + Sync {
    /// Whether `replica`'s host is a read replica or reader endpoint of
    /// `master`'s host.
    async fn is_replica_of(
        &self,
        replica: &SecretDocument,
        master: &SecretDocument,
    ) -> Result<bool, TopologyError>;

    /// Resolve the endpoint of the primary database named by an
    /// RDS-managed master secret's system tags.
    async fn primary_endpoint(
        &self,
        reference: &PrimaryDatabaseArn,
    ) -> Result<PrimaryEndpoint, TopologyError>;
}

/// Map an RDS SDK failure, folding the not-found faults into
/// [`TopologyError::NotFound`].
fn map_rds_error<E, R>(err: SdkError<E, R>, identifier: &str) -> TopologyError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match err.as_service_error().and_then(ProvideErrorMetadata::code) {
        Some("DBInstanceNotFound" | "DBInstanceNotFoundFault" | "DBClusterNotFoundFault") => {
            TopologyError::NotFound {
                identifier: identifier.to_string(),
            }
        }
        _ => TopologyError::Api(Box::new(err)),
    }
}

/// First label of an RDS endpoint host name, which is the DB identifier.
fn instance_identifier(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

/// Aurora cluster (writer) endpoints carry "cluster" in their second host
/// label; instance endpoints do not.
fn is_cluster_endpoint(host: &str) -> bool {
    host.split('.')
        .nth(1)
        .is_some_and(|label| label.contains("cluster"))
}

/// RDS API implementation of [`DatabaseTopology`].
#[derive(Debug, Clone)]
pub struct RdsTopology {
    client: RdsClient,
}

struct ClusterView {
    reader_endpoint: Option<String>,
    /// (instance identifier, is writer)
    members: Vec<(String, bool)>,
}

impl RdsTopology {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;
        Self {
            client: RdsClient::new(&sdk_config),
        }
    }

    pub fn from_client(client: RdsClient) -> Self {
        Self { client }
    }

    async fn describe_instance(
        &self,
        identifier: &str,
    ) -> Result<aws_sdk_rds::types::DbInstance, TopologyError> {
        let response = self
            .client
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await
            .map_err(|e| map_rds_error(e, identifier))?;
        response
            .db_instances()
            .first()
            .cloned()
            .ok_or_else(|| TopologyError::NotFound {
                identifier: identifier.to_string(),
            })
    }

    async fn describe_cluster(
        &self,
        identifier: &str,
    ) -> Result<aws_sdk_rds::types::DbCluster, TopologyError> {
        let response = self
            .client
            .describe_db_clusters()
            .db_cluster_identifier(identifier)
            .send()
            .await
            .map_err(|e| map_rds_error(e, identifier))?;
        response
            .db_clusters()
            .first()
            .cloned()
            .ok_or_else(|| TopologyError::NotFound {
                identifier: identifier.to_string(),
            })
    }

    /// Resolve the cluster a master host belongs to, whether the host is a
    /// writer endpoint or an instance endpoint.
    async fn cluster_view(&self, master_host: &str) -> Result<Option<ClusterView>, TopologyError> {
        let master_id = instance_identifier(master_host);
        let cluster = if is_cluster_endpoint(master_host) {
            self.describe_cluster(master_id).await?
        } else {
            let instance = self.describe_instance(master_id).await?;
            let Some(cluster_id) = instance.db_cluster_identifier() else {
                return Ok(None);
            };
            self.describe_cluster(cluster_id).await?
        };

        Ok(Some(ClusterView {
            reader_endpoint: cluster.reader_endpoint().map(str::to_string),
            members: cluster
                .db_cluster_members()
                .iter()
                .filter_map(|member| {
                    Some((
                        member.db_instance_identifier()?.to_string(),
                        member.is_cluster_writer().unwrap_or(false),
                    ))
                })
                .collect(),
        }))
    }
}

#[async_trait]
impl DatabaseTopology for RdsTopology {
    async fn is_replica_of(
        &self,
        replica: &SecretDocument,
        master: &SecretDocument,
    ) -> Result<bool, TopologyError> {
        let replica_id = instance_identifier(replica.host());

        match master.engine.as_deref() {
            Some("postgres") => {
                let instance = match self.describe_instance(replica_id).await {
                    Ok(instance) => instance,
                    Err(TopologyError::NotFound { .. }) => return Ok(false),
                    Err(err) => return Err(err),
                };
                Ok(instance.read_replica_source_db_instance_identifier()
                    == Some(instance_identifier(master.host())))
            }
            Some("aurora-postgresql") => {
                let Some(view) = self.cluster_view(master.host()).await? else {
                    return Ok(false);
                };
                let is_reader_endpoint = view.reader_endpoint.as_deref() == Some(replica.host());
                let is_reader_instance = view
                    .members
                    .iter()
                    .any(|(member_id, is_writer)| member_id == replica_id && !is_writer);
                Ok(is_reader_endpoint || is_reader_instance)
            }
            other => {
                warn!(engine = ?other, "replica validation unsupported for engine");
                Ok(false)
            }
        }
    }

    async fn primary_endpoint(
        &self,
        reference: &PrimaryDatabaseArn,
    ) -> Result<PrimaryEndpoint, TopologyError> {
        match reference {
            PrimaryDatabaseArn::Instance(arn) => {
                let instance = self.describe_instance(arn).await?;
                let endpoint = instance.endpoint().ok_or_else(|| TopologyError::NotFound {
                    identifier: arn.clone(),
                })?;
                Ok(PrimaryEndpoint {
                    host: endpoint.address().unwrap_or_default().to_string(),
                    port: endpoint.port().and_then(|p| u16::try_from(p).ok()),
                    engine: instance.engine().map(str::to_string),
                })
            }
            PrimaryDatabaseArn::Cluster(arn) => {
                let cluster = self.describe_cluster(arn).await?;
                Ok(PrimaryEndpoint {
                    host: cluster.endpoint().unwrap_or_default().to_string(),
                    port: cluster.port().and_then(|p| u16::try_from(p).ok()),
                    engine: cluster.engine().map(str::to_string),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_identifier_is_first_host_label() {
        assert_eq!(
            instance_identifier("mydb.abc123.eu-west-2.rds.amazonaws.com"),
            "mydb"
        );
        assert_eq!(instance_identifier("bare-host"), "bare-host");
    }

    #[test]
    fn test_cluster_endpoint_detection() {
        assert!(is_cluster_endpoint(
            "mycluster.cluster-abc123.eu-west-2.rds.amazonaws.com"
        ));
        assert!(!is_cluster_endpoint(
            "mydb.abc123.eu-west-2.rds.amazonaws.com"
        ));
        assert!(!is_cluster_endpoint("bare-host"));
    }

    #[test]
    fn test_primary_arn_from_tags_instance() {
        let tags = HashMap::from([(
            "aws:rds:primarydbinstancearn".to_string(),
            "arn:aws:rds:eu-west-2:123456789012:db:mydb".to_string(),
        )]);
        let arn = PrimaryDatabaseArn::from_tags(&tags).unwrap().unwrap();
        assert_eq!(
            arn,
            PrimaryDatabaseArn::Instance("arn:aws:rds:eu-west-2:123456789012:db:mydb".to_string())
        );
    }

    #[test]
    fn test_primary_arn_from_tags_is_case_insensitive() {
        let tags = HashMap::from([(
            "AWS:RDS:PrimaryDbClusterArn".to_string(),
            "arn:aws:rds:eu-west-2:123456789012:cluster:mycluster".to_string(),
        )]);
        let arn = PrimaryDatabaseArn::from_tags(&tags).unwrap().unwrap();
        assert!(matches!(arn, PrimaryDatabaseArn::Cluster(_)));
    }

    #[test]
    fn test_primary_arn_absent_from_unrelated_tags() {
        let tags = HashMap::from([("team".to_string(), "payments".to_string())]);
        assert_eq!(PrimaryDatabaseArn::from_tags(&tags).unwrap(), None);
    }

    #[test]
    fn test_primary_arn_too_long_rejected() {
        let tags = HashMap::from([(
            "aws:rds:primarydbinstancearn".to_string(),
            "a".repeat(MAX_DB_ARN_LENGTH + 1),
        )]);
        assert!(matches!(
            PrimaryDatabaseArn::from_tags(&tags),
            Err(TopologyError::ArnTooLong { .. })
        ));
    }
}
