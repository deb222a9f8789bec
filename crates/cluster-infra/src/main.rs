//! cluster-infra: EKS/SKS infrastructure provisioning and teardown
//!
//! This tool tears down cluster networks and load balancers, manages the
//! block-storage volumes and IAM roles the clusters depend on, and reports
//! the state of an AWS region.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cluster_infra::aws::admin_role::AdminRoleRequest;
use cluster_infra::aws::eks::ClusterTeardownConfig;
use cluster_infra::aws::status::write_status;
use cluster_infra::aws::subnets::{StackOutputs, tag_subnets};
use cluster_infra::aws::{
    AwsContext, AwsNetwork, AwsVolumes, EksClusters, FromAwsContext, IamRoles, resolve_account_id,
    teardown_cluster,
};
use cluster_infra::config::{self, EnvironmentReport};
use cluster_infra::exoscale::{
    ExoscaleClient, ExoscaleCredentials, ExoscaleVolumes, LoadBalancerTeardownConfig,
    teardown_load_balancers,
};
use cluster_infra::teardown::{NetworkTeardown, TeardownConfig};
use cluster_infra::volume::{BlockStorage, provision_volume, teardown_volume};
use cluster_infra::wait::PollConfig;
use cluster_infra_common::defaults::{
    DEFAULT_CLUSTER_TIMEOUT_SECS, DEFAULT_EXOSCALE_ZONE, DEFAULT_INLINE_POLICY_TEMPLATE,
    DEFAULT_NAT_TIMEOUT_SECS, DEFAULT_SETTLE_DELAY_SECS, DEFAULT_STAGE_TIMEOUT_SECS,
    DEFAULT_STATUS_FILE, DEFAULT_TRUST_POLICY_TEMPLATE, DEFAULT_VPC_TAG_KEY,
    EXPECTED_VOLUME_NAMES,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cluster-infra")]
#[command(about = "Provision and tear down EKS/SKS cluster infrastructure")]
#[command(version)]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ClusterArgs {
    /// Logical cluster name
    #[arg(long, env = "CLUSTER_NAME")]
    cluster_name: String,
}

#[derive(clap::Args, Debug)]
struct RegionArgs {
    /// AWS region (falls back to AWS_REGION, then ca-central-1)
    #[arg(long, env = "REGION")]
    region: Option<String>,
}

impl RegionArgs {
    async fn context(self) -> AwsContext {
        AwsContext::new(&config::resolve_region(self.region)).await
    }
}

#[derive(clap::Args, Debug)]
struct VolumeNameArgs {
    /// Logical volume name, matched against the `name` tag or label
    #[arg(long, env = "VOLUME_NAME")]
    name: String,
}

#[derive(clap::Args, Debug)]
struct ProvisionVolumeArgs {
    #[command(flatten)]
    volume: VolumeNameArgs,

    /// Size in GiB
    #[arg(long, env = "VOLUME_SIZE")]
    size: u64,

    /// Directory the volume record is written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(clap::Args, Debug)]
struct ExoscaleArgs {
    /// Exoscale zone
    #[arg(long, env = "EXOSCALE_ZONE", default_value = DEFAULT_EXOSCALE_ZONE)]
    zone: String,

    #[arg(long, env = "EXOSCALE_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "EXOSCALE_API_SECRET", hide_env_values = true)]
    api_secret: String,
}

impl ExoscaleArgs {
    fn client(self) -> Result<ExoscaleClient> {
        ExoscaleClient::new(
            &self.zone,
            ExoscaleCredentials {
                api_key: self.api_key,
                api_secret: self.api_secret,
            },
        )
    }
}

/// Arguments for the network teardown (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct ClusterWaitArgs {
    /// Seconds to wait for each node group and for the cluster to be deleted
    #[arg(long, default_value_t = DEFAULT_CLUSTER_TIMEOUT_SECS)]
    cluster_timeout_secs: u64,
}

impl ClusterWaitArgs {
    fn teardown_config(&self) -> ClusterTeardownConfig {
        let timeout = Duration::from_secs(self.cluster_timeout_secs);
        ClusterTeardownConfig {
            node_group_poll: PollConfig::NODE_GROUP.with_timeout(timeout),
            cluster_poll: PollConfig::EKS_CLUSTER.with_timeout(timeout),
            ..ClusterTeardownConfig::default()
        }
    }
}

#[derive(clap::Args, Debug)]
struct TeardownNetworkArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(flatten)]
    region: RegionArgs,

    #[command(flatten)]
    cluster_wait: ClusterWaitArgs,

    /// Tag key whose value is the cluster name
    #[arg(long, default_value = DEFAULT_VPC_TAG_KEY)]
    vpc_tag_key: String,

    /// Leave the EKS cluster alone and only delete the network
    #[arg(long)]
    skip_cluster: bool,

    /// List what would be deleted without deleting anything
    #[arg(long)]
    dry_run: bool,

    /// Seconds to wait after releasing elastic IPs
    #[arg(long, default_value_t = DEFAULT_SETTLE_DELAY_SECS)]
    settle_delay_secs: u64,

    /// Seconds each stage waits for its deletions before moving on
    #[arg(long, default_value_t = DEFAULT_STAGE_TIMEOUT_SECS)]
    stage_timeout_secs: u64,

    /// Seconds to wait for NAT gateways to reach `deleted`
    #[arg(long, default_value_t = DEFAULT_NAT_TIMEOUT_SECS)]
    nat_timeout_secs: u64,
}

impl TeardownNetworkArgs {
    fn teardown_config(&self) -> TeardownConfig {
        TeardownConfig {
            tag_key: self.vpc_tag_key.clone(),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            dry_run: self.dry_run,
            poll: PollConfig::NETWORK.with_timeout(Duration::from_secs(self.stage_timeout_secs)),
            nat_poll: PollConfig::NAT_GATEWAY
                .with_timeout(Duration::from_secs(self.nat_timeout_secs)),
            ..TeardownConfig::new(&self.cluster.cluster_name)
        }
    }
}

#[derive(clap::Args, Debug)]
struct AdminRoleTargetArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(flatten)]
    region: RegionArgs,

    /// Repository as `org/repo`, or a bare name combined with --org
    /// (default: every entry of $ADMIN_REPOS)
    #[arg(long)]
    repo: Option<String>,

    /// GitHub organization of a bare --repo
    #[arg(long, env = "GITHUB_ORGANIZATION_NAME")]
    org: Option<String>,
}

#[derive(clap::Args, Debug)]
struct AdminRoleCreateArgs {
    #[command(flatten)]
    target: AdminRoleTargetArgs,

    /// Trust policy template (${ACCOUNT_ID}, ${ORG_NAME}, ${REPO_NAME})
    #[arg(long, default_value = DEFAULT_TRUST_POLICY_TEMPLATE)]
    trust_template: PathBuf,

    /// Inline policy template (${ACCOUNT_ID}, ${CLUSTER_NAME}, ${REPO_NAME})
    #[arg(long, default_value = DEFAULT_INLINE_POLICY_TEMPLATE)]
    inline_template: PathBuf,

    /// Account ID (looked up through STS when unset)
    #[arg(long, env = "AWS_ACCOUNT_ID")]
    account_id: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the provisioning environment and print it as JSON
    Env {
        #[arg(long, env = "CLUSTER_NAME")]
        cluster_name: Option<String>,

        #[command(flatten)]
        region: RegionArgs,
    },

    /// AWS (EKS, EC2, IAM) commands
    #[command(subcommand)]
    Aws(AwsCommand),

    /// Exoscale (SKS, block storage) commands
    #[command(subcommand)]
    Exoscale(ExoscaleCommand),
}

#[derive(Subcommand, Debug)]
enum AwsCommand {
    /// Delete the EKS cluster and every VPC tagged with its name
    TeardownNetwork(Box<TeardownNetworkArgs>),

    /// Delete only the load balancers inside the cluster's VPCs
    TeardownLoadBalancers {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        region: RegionArgs,

        #[arg(long, default_value = DEFAULT_VPC_TAG_KEY)]
        vpc_tag_key: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Delete the EKS cluster and its node groups
    TeardownCluster {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        region: RegionArgs,

        #[command(flatten)]
        wait: ClusterWaitArgs,
    },

    /// Create the EKS cluster and node IAM roles
    ProvisionIamRoles {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        region: RegionArgs,
    },

    /// Manage the OIDC admin roles of GitHub repositories
    #[command(subcommand)]
    AdminRole(AdminRoleCommand),

    /// Tag the public subnets listed in a Pulumi outputs file
    TagSubnets {
        /// Stack outputs JSON (`region`, `cluster_name`, `public_subnet_ids`)
        outputs: PathBuf,
    },

    /// Find, restore or create an EBS volume
    ProvisionVolume {
        #[command(flatten)]
        region: RegionArgs,

        #[command(flatten)]
        args: ProvisionVolumeArgs,
    },

    /// Snapshot and delete an EBS volume
    TeardownVolume {
        #[command(flatten)]
        region: RegionArgs,

        #[command(flatten)]
        volume: VolumeNameArgs,
    },

    /// Write a markdown report of volumes, VPCs and clusters
    Status {
        #[command(flatten)]
        region: RegionArgs,

        /// Comma-separated logical volume names
        #[arg(long, value_delimiter = ',', default_values = EXPECTED_VOLUME_NAMES)]
        volume_names: Vec<String>,

        #[arg(long, default_value = DEFAULT_STATUS_FILE)]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum AdminRoleCommand {
    /// Create the role, its scoped policies and the inline policy
    Create(Box<AdminRoleCreateArgs>),

    /// Delete the role and its scoped policies
    Cleanup(AdminRoleTargetArgs),
}

#[derive(Subcommand, Debug)]
enum ExoscaleCommand {
    /// Delete the network load balancers of an SKS cluster
    TeardownLoadBalancers {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        exoscale: ExoscaleArgs,

        /// Only match NLBs by their targets, not by the `k8s-` name prefix
        #[arg(long)]
        no_prefix_match: bool,
    },

    /// Find, restore or create a block storage volume
    ProvisionVolume {
        #[command(flatten)]
        exoscale: ExoscaleArgs,

        #[command(flatten)]
        args: ProvisionVolumeArgs,
    },

    /// Snapshot and delete a block storage volume
    TeardownVolume {
        #[command(flatten)]
        exoscale: ExoscaleArgs,

        #[command(flatten)]
        volume: VolumeNameArgs,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // Reduce noise from AWS SDK (show only warnings and errors)
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for target in ["aws_config", "aws_sdk", "aws_smithy"] {
        filter = filter.add_directive(format!("{target}=warn").parse()?);
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    match args.command {
        Command::Env {
            cluster_name,
            region,
        } => {
            let report =
                EnvironmentReport::from_env(cluster_name, config::resolve_region(region.region))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Aws(command) => handle_aws(command).await?,
        Command::Exoscale(command) => handle_exoscale(command).await?,
    }

    Ok(())
}

async fn handle_aws(command: AwsCommand) -> Result<()> {
    match command {
        AwsCommand::TeardownNetwork(args) => handle_teardown_network(*args).await,

        AwsCommand::TeardownLoadBalancers {
            cluster,
            region,
            vpc_tag_key,
            dry_run,
        } => {
            let ctx = region.context().await;
            let network = AwsNetwork::from_context(&ctx);
            let config = TeardownConfig {
                tag_key: vpc_tag_key,
                dry_run,
                ..TeardownConfig::new(cluster.cluster_name)
            };
            let report = NetworkTeardown::new(&network, config)
                .run_load_balancers()
                .await?;
            println!("Deleted {} load balancers", report.load_balancers);
            Ok(())
        }

        AwsCommand::TeardownCluster {
            cluster,
            region,
            wait,
        } => {
            let ctx = region.context().await;
            let eks = EksClusters::from_context(&ctx);
            let result =
                teardown_cluster(&eks, &cluster.cluster_name, wait.teardown_config()).await?;
            info!(
                cluster = %cluster.cluster_name,
                node_groups = ?result.node_groups_deleted,
                cluster_deleted = result.cluster_deleted,
                "Cluster teardown finished"
            );
            Ok(())
        }

        AwsCommand::ProvisionIamRoles { cluster, region } => {
            let ctx = region.context().await;
            let roles = IamRoles::from_context(&ctx)
                .provision_cluster_roles(&cluster.cluster_name)
                .await?;
            println!("cluster_role_arn={}", roles.cluster_role_arn);
            println!("node_role_arn={}", roles.node_role_arn);
            Ok(())
        }

        AwsCommand::AdminRole(command) => handle_admin_role(command).await,

        AwsCommand::TagSubnets { outputs } => {
            let outputs = StackOutputs::from_file(&outputs)?;
            let ctx = AwsContext::new(&outputs.region).await;
            let tagged = tag_subnets(&ctx.ec2_client(), &outputs).await?;
            println!("Tagged {tagged} subnets for {}", outputs.cluster_name);
            Ok(())
        }

        AwsCommand::ProvisionVolume { region, args } => {
            let ctx = region.context().await;
            provision(&AwsVolumes::from_context(&ctx), args).await
        }

        AwsCommand::TeardownVolume { region, volume } => {
            let ctx = region.context().await;
            teardown(&AwsVolumes::from_context(&ctx), &volume.name).await
        }

        AwsCommand::Status {
            region,
            volume_names,
            output,
        } => {
            let ctx = region.context().await;
            write_status(&ctx, &volume_names, &output).await?;
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}

async fn handle_teardown_network(args: TeardownNetworkArgs) -> Result<()> {
    let config = args.teardown_config();
    let ctx = args.region.context().await;
    let cluster_name = &args.cluster.cluster_name;

    if args.skip_cluster {
        info!(cluster = %cluster_name, "Skipping EKS cluster teardown");
    } else if args.dry_run {
        info!(cluster = %cluster_name, "Dry run: would delete the EKS cluster and its node groups");
    } else {
        let eks = EksClusters::from_context(&ctx);
        teardown_cluster(&eks, cluster_name, args.cluster_wait.teardown_config())
            .await
            .with_context(|| format!("Failed to tear down EKS cluster {cluster_name}"))?;
    }

    let network = AwsNetwork::from_context(&ctx);
    let report = NetworkTeardown::new(&network, config).run().await?;

    let verb = if args.dry_run { "Would delete" } else { "Deleted" };
    println!("{verb}: {report}");
    Ok(())
}

async fn handle_admin_role(command: AdminRoleCommand) -> Result<()> {
    match command {
        AdminRoleCommand::Create(args) => {
            let AdminRoleCreateArgs {
                target,
                trust_template,
                inline_template,
                account_id,
            } = *args;
            let repos = config::admin_targets(target.org.as_deref(), target.repo.as_deref())?;
            let ctx = target.region.context().await;
            let account_id = resolve_account_id(account_id.as_deref(), ctx.sdk_config()).await?;
            let iam = IamRoles::from_context(&ctx);

            for admin in &repos {
                let request = AdminRoleRequest {
                    cluster_name: &target.cluster.cluster_name,
                    org: &admin.org,
                    repo: &admin.repo,
                    account_id: &account_id,
                    trust_template: &trust_template,
                    inline_template: &inline_template,
                };
                let arn = iam.create_admin_role(&request).await.with_context(|| {
                    format!("Failed to create admin role for {}/{}", admin.org, admin.repo)
                })?;
                println!("{}/{}: {arn}", admin.org, admin.repo);
            }
            Ok(())
        }

        AdminRoleCommand::Cleanup(target) => {
            let repos = config::admin_targets(target.org.as_deref(), target.repo.as_deref())?;
            let ctx = target.region.context().await;
            let iam = IamRoles::from_context(&ctx);

            for admin in &repos {
                iam.cleanup_admin_role(&target.cluster.cluster_name, &admin.org, &admin.repo)
                    .await
                    .with_context(|| {
                        format!("Failed to clean up admin role for {}/{}", admin.org, admin.repo)
                    })?;
            }
            Ok(())
        }
    }
}

async fn handle_exoscale(command: ExoscaleCommand) -> Result<()> {
    match command {
        ExoscaleCommand::TeardownLoadBalancers {
            cluster,
            exoscale,
            no_prefix_match,
        } => {
            let client = exoscale.client()?;
            let config = LoadBalancerTeardownConfig {
                match_prefix: !no_prefix_match,
                ..Default::default()
            };
            let deleted = teardown_load_balancers(&client, &cluster.cluster_name, config).await?;
            println!("Deleted {} network load balancers", deleted.len());
            Ok(())
        }

        ExoscaleCommand::ProvisionVolume { exoscale, args } => {
            let volumes = ExoscaleVolumes::new(exoscale.client()?);
            provision(&volumes, args).await
        }

        ExoscaleCommand::TeardownVolume { exoscale, volume } => {
            let volumes = ExoscaleVolumes::new(exoscale.client()?);
            teardown(&volumes, &volume.name).await
        }
    }
}

async fn provision<S: BlockStorage>(storage: &S, args: ProvisionVolumeArgs) -> Result<()> {
    let provisioned =
        provision_volume(storage, &args.volume.name, args.size, &args.output_dir).await?;
    println!(
        "{} ({:?}), record written to {}",
        provisioned.volume_id,
        provisioned.source,
        provisioned.record_path.display()
    );
    Ok(())
}

async fn teardown<S: BlockStorage>(storage: &S, name: &str) -> Result<()> {
    let result = teardown_volume(storage, name).await?;
    println!(
        "Deleted {} volumes, snapshots: {}",
        result.deleted_volume_ids.len(),
        result.snapshot_ids.join(", ")
    );
    Ok(())
}
