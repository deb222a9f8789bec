//! EC2, ELB and ELBv2 implementation of [`NetworkOperations`]

use crate::aws::context::{AwsContext, FromAwsContext};
use crate::aws::error::ignore_not_found;
use crate::teardown::{
    ElasticIpAssociation, InternetGatewaySummary, LoadBalancerKind, LoadBalancerSummary,
    NatGatewaySummary, NetworkInterfaceSummary, NetworkOperations, NetworkSummary,
    RouteTableSummary, SecurityGroupSummary, SubnetSummary,
};
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{Filter, IpPermission, SecurityGroup};
use cluster_infra_common::tags::display_name;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Network teardown operations backed by the AWS SDK
#[derive(Clone)]
pub struct AwsNetwork {
    ec2: aws_sdk_ec2::Client,
    elb: aws_sdk_elasticloadbalancing::Client,
    elbv2: aws_sdk_elasticloadbalancingv2::Client,
}

impl FromAwsContext for AwsNetwork {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            ec2: ctx.ec2_client(),
            elb: ctx.elb_client(),
            elbv2: ctx.elbv2_client(),
        }
    }
}

fn vpc_filter(vpc_id: &str) -> Filter {
    Filter::builder().name("vpc-id").values(vpc_id).build()
}

/// Classic load balancer name from an ELB network interface description.
///
/// Classic ELB interfaces are described as `ELB <name>`; v2 interfaces use
/// `ELB app/<name>/<id>` or `ELB net/<name>/<id>` and are found by VPC instead.
pub fn classic_load_balancer_from_description(description: &str) -> Option<&str> {
    let name = description.strip_prefix("ELB ")?.trim();
    if name.is_empty() || name.contains('/') || name.contains(' ') {
        return None;
    }
    Some(name)
}

/// Groups referenced by any of a group's ingress or egress rules
fn referenced_groups(group: &SecurityGroup) -> BTreeSet<String> {
    group
        .ip_permissions()
        .iter()
        .chain(group.ip_permissions_egress())
        .flat_map(|p| p.user_id_group_pairs())
        .filter_map(|pair| pair.group_id())
        .map(str::to_string)
        .collect()
}

/// Narrow permissions to the group pairs that reference one of `referenced`.
///
/// IP ranges and prefix lists on the same permission are left in place.
fn permissions_referencing(permissions: &[IpPermission], referenced: &[String]) -> Vec<IpPermission> {
    permissions
        .iter()
        .filter_map(|p| {
            let pairs: Vec<_> = p
                .user_id_group_pairs()
                .iter()
                .filter(|pair| {
                    pair.group_id()
                        .is_some_and(|g| referenced.iter().any(|r| r == g))
                })
                .cloned()
                .collect();
            if pairs.is_empty() {
                return None;
            }
            Some(
                IpPermission::builder()
                    .set_ip_protocol(p.ip_protocol().map(str::to_string))
                    .set_from_port(p.from_port())
                    .set_to_port(p.to_port())
                    .set_user_id_group_pairs(Some(pairs))
                    .build(),
            )
        })
        .collect()
}

impl AwsNetwork {
    async fn describe_security_group(&self, group_id: &str) -> Result<Option<SecurityGroup>> {
        let result = self
            .ec2
            .describe_security_groups()
            .group_ids(group_id)
            .send()
            .await;
        Ok(ignore_not_found(result)
            .context("Failed to describe security group")?
            .and_then(|out| out.security_groups().first().cloned()))
    }

    async fn revoke_permissions(
        &self,
        group_id: &str,
        ingress: Vec<IpPermission>,
        egress: Vec<IpPermission>,
    ) -> Result<()> {
        if !ingress.is_empty() {
            let result = self
                .ec2
                .revoke_security_group_ingress()
                .group_id(group_id)
                .set_ip_permissions(Some(ingress))
                .send()
                .await;
            ignore_not_found(result).context("Failed to revoke ingress rules")?;
        }
        if !egress.is_empty() {
            let result = self
                .ec2
                .revoke_security_group_egress()
                .group_id(group_id)
                .set_ip_permissions(Some(egress))
                .send()
                .await;
            ignore_not_found(result).context("Failed to revoke egress rules")?;
        }
        Ok(())
    }

    async fn classic_load_balancer_names_from_interfaces(&self, vpc_id: &str) -> Result<BTreeSet<String>> {
        let interfaces = self.list_network_interfaces(vpc_id).await?;
        Ok(interfaces
            .iter()
            .filter_map(|eni| classic_load_balancer_from_description(&eni.description))
            .map(str::to_string)
            .collect())
    }
}

impl NetworkOperations for AwsNetwork {
    async fn find_networks(&self, tag_key: &str, tag_value: &str) -> Result<Vec<NetworkSummary>> {
        let mut networks = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_vpcs()
                .filters(
                    Filter::builder()
                        .name(format!("tag:{tag_key}"))
                        .values(tag_value)
                        .build(),
                )
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe VPCs")?;

            networks.extend(
                page.vpcs()
                    .iter()
                    .filter_map(|vpc| {
                        let id = vpc.vpc_id()?.to_string();
                        let tags = vpc
                            .tags()
                            .iter()
                            .filter_map(|t| Some((t.key()?, t.value()?)));
                        Some(NetworkSummary {
                            id,
                            name: display_name(tags).map(str::to_string),
                        })
                    }),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(networks)
    }

    async fn delete_network(&self, vpc_id: &str) -> Result<()> {
        let result = self.ec2.delete_vpc().vpc_id(vpc_id).send().await;
        match ignore_not_found(result).context("Failed to delete VPC")? {
            Some(_) => info!(vpc_id = %vpc_id, "VPC deleted"),
            None => debug!(vpc_id = %vpc_id, "VPC already deleted"),
        }
        Ok(())
    }

    async fn list_load_balancers(&self, vpc_id: &str) -> Result<Vec<LoadBalancerSummary>> {
        let named_by_interfaces = self.classic_load_balancer_names_from_interfaces(vpc_id).await?;
        let mut load_balancers = Vec::new();

        let mut marker = None;
        loop {
            let page = self
                .elb
                .describe_load_balancers()
                .set_marker(marker)
                .send()
                .await
                .context("Failed to describe classic load balancers")?;
            for lb in page.load_balancer_descriptions() {
                let Some(name) = lb.load_balancer_name() else {
                    continue;
                };
                if lb.vpc_id() == Some(vpc_id) || named_by_interfaces.contains(name) {
                    load_balancers.push(LoadBalancerSummary {
                        kind: LoadBalancerKind::Classic,
                        name: name.to_string(),
                        arn: None,
                    });
                }
            }
            marker = page.next_marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        let mut marker = None;
        loop {
            let page = self
                .elbv2
                .describe_load_balancers()
                .set_marker(marker)
                .send()
                .await
                .context("Failed to describe v2 load balancers")?;
            for lb in page.load_balancers() {
                if lb.vpc_id() != Some(vpc_id) {
                    continue;
                }
                load_balancers.push(LoadBalancerSummary {
                    kind: LoadBalancerKind::V2,
                    name: lb.load_balancer_name().unwrap_or_default().to_string(),
                    arn: lb.load_balancer_arn().map(str::to_string),
                });
            }
            marker = page.next_marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        Ok(load_balancers)
    }

    async fn delete_load_balancer(&self, load_balancer: &LoadBalancerSummary) -> Result<()> {
        let deleted = match load_balancer.kind {
            LoadBalancerKind::Classic => {
                let result = self
                    .elb
                    .delete_load_balancer()
                    .load_balancer_name(&load_balancer.name)
                    .send()
                    .await;
                ignore_not_found(result)
                    .context("Failed to delete classic load balancer")?
                    .is_some()
            }
            LoadBalancerKind::V2 => {
                let arn = load_balancer
                    .arn
                    .as_deref()
                    .with_context(|| format!("Load balancer {} has no ARN", load_balancer.name))?;
                let result = self
                    .elbv2
                    .delete_load_balancer()
                    .load_balancer_arn(arn)
                    .send()
                    .await;
                ignore_not_found(result)
                    .context("Failed to delete v2 load balancer")?
                    .is_some()
            }
        };
        if deleted {
            info!(kind = %load_balancer.kind, name = %load_balancer.name, "Load balancer deleted");
        }
        Ok(())
    }

    async fn list_nat_gateways(&self, vpc_id: &str) -> Result<Vec<NatGatewaySummary>> {
        let mut nat_gateways = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_nat_gateways()
                .filter(vpc_filter(vpc_id))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe NAT gateways")?;

            nat_gateways.extend(
                page.nat_gateways()
                    .iter()
                    .filter_map(|gw| {
                        Some(NatGatewaySummary {
                            id: gw.nat_gateway_id()?.to_string(),
                            state: gw.state().map(|s| s.as_str().to_string()).unwrap_or_default(),
                            allocation_ids: gw
                                .nat_gateway_addresses()
                                .iter()
                                .filter_map(|a| a.allocation_id())
                                .map(str::to_string)
                                .collect(),
                        })
                    }),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(nat_gateways)
    }

    async fn delete_nat_gateway(&self, nat_gateway_id: &str) -> Result<()> {
        let result = self
            .ec2
            .delete_nat_gateway()
            .nat_gateway_id(nat_gateway_id)
            .send()
            .await;
        if ignore_not_found(result)
            .context("Failed to delete NAT gateway")?
            .is_some()
        {
            info!(nat_gateway_id = %nat_gateway_id, "NAT gateway deletion started");
        }
        Ok(())
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<()> {
        let result = self
            .ec2
            .disassociate_address()
            .association_id(association_id)
            .send()
            .await;
        ignore_not_found(result).context("Failed to disassociate elastic IP")?;
        Ok(())
    }

    async fn release_address(&self, allocation_id: &str) -> Result<()> {
        let result = self
            .ec2
            .release_address()
            .allocation_id(allocation_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to release elastic IP")? {
            Some(_) => info!(allocation_id = %allocation_id, "Elastic IP released"),
            None => debug!(allocation_id = %allocation_id, "Elastic IP already released"),
        }
        Ok(())
    }

    async fn list_security_groups(&self, vpc_id: &str) -> Result<Vec<SecurityGroupSummary>> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_security_groups()
                .filters(vpc_filter(vpc_id))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe security groups")?;

            groups.extend(
                page.security_groups()
                    .iter()
                    .filter_map(|sg| {
                        Some(SecurityGroupSummary {
                            id: sg.group_id()?.to_string(),
                            name: sg.group_name().unwrap_or_default().to_string(),
                            referenced_groups: referenced_groups(sg),
                            has_rules: !sg.ip_permissions().is_empty()
                                || !sg.ip_permissions_egress().is_empty(),
                        })
                    }),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(groups)
    }

    async fn revoke_group_references(&self, group_id: &str, referenced: &[String]) -> Result<()> {
        let Some(group) = self.describe_security_group(group_id).await? else {
            return Ok(());
        };
        let ingress = permissions_referencing(group.ip_permissions(), referenced);
        let egress = permissions_referencing(group.ip_permissions_egress(), referenced);
        debug!(
            sg_id = %group_id,
            ingress = ingress.len(),
            egress = egress.len(),
            "Revoking rules referencing other groups"
        );
        self.revoke_permissions(group_id, ingress, egress).await
    }

    async fn revoke_all_rules(&self, group_id: &str) -> Result<()> {
        let Some(group) = self.describe_security_group(group_id).await? else {
            return Ok(());
        };
        self.revoke_permissions(
            group_id,
            group.ip_permissions().to_vec(),
            group.ip_permissions_egress().to_vec(),
        )
        .await
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let result = self
            .ec2
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete security group")? {
            Some(_) => info!(sg_id = %group_id, "Security group deleted"),
            None => debug!(sg_id = %group_id, "Security group already deleted"),
        }
        Ok(())
    }

    async fn list_network_interfaces(&self, vpc_id: &str) -> Result<Vec<NetworkInterfaceSummary>> {
        let mut interfaces = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_network_interfaces()
                .filters(vpc_filter(vpc_id))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe network interfaces")?;

            interfaces.extend(
                page.network_interfaces()
                    .iter()
                    .filter_map(|eni| {
                        let elastic_ip = eni.association().and_then(|assoc| {
                            Some(ElasticIpAssociation {
                                allocation_id: assoc.allocation_id()?.to_string(),
                                association_id: assoc.association_id().map(str::to_string),
                            })
                        });
                        Some(NetworkInterfaceSummary {
                            id: eni.network_interface_id()?.to_string(),
                            subnet_id: eni.subnet_id().map(str::to_string),
                            status: eni.status().map(|s| s.as_str().to_string()).unwrap_or_default(),
                            description: eni.description().unwrap_or_default().to_string(),
                            group_ids: eni
                                .groups()
                                .iter()
                                .filter_map(|g| g.group_id())
                                .map(str::to_string)
                                .collect(),
                            elastic_ip,
                        })
                    }),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(interfaces)
    }

    async fn set_network_interface_groups(&self, eni_id: &str, group_ids: &[String]) -> Result<()> {
        let result = self
            .ec2
            .modify_network_interface_attribute()
            .network_interface_id(eni_id)
            .set_groups(Some(group_ids.to_vec()))
            .send()
            .await;
        ignore_not_found(result).context("Failed to modify network interface security groups")?;
        Ok(())
    }

    async fn delete_network_interface(&self, eni_id: &str) -> Result<()> {
        let result = self
            .ec2
            .delete_network_interface()
            .network_interface_id(eni_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete network interface")? {
            Some(_) => info!(eni_id = %eni_id, "Network interface deleted"),
            None => debug!(eni_id = %eni_id, "Network interface already deleted"),
        }
        Ok(())
    }

    async fn list_route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTableSummary>> {
        let mut tables = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_route_tables()
                .filters(vpc_filter(vpc_id))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe route tables")?;

            tables.extend(
                page.route_tables()
                    .iter()
                    .filter_map(|table| {
                        let associations = table.associations();
                        Some(RouteTableSummary {
                            id: table.route_table_id()?.to_string(),
                            main: associations.iter().any(|a| a.main().unwrap_or(false)),
                            association_ids: associations
                                .iter()
                                .filter(|a| !a.main().unwrap_or(false))
                                .filter_map(|a| a.route_table_association_id())
                                .map(str::to_string)
                                .collect(),
                            gateway_routes: table
                                .routes()
                                .iter()
                                .filter(|r| r.gateway_id().is_some_and(|g| g.starts_with("igw-")))
                                .filter_map(|r| r.destination_cidr_block())
                                .map(str::to_string)
                                .collect(),
                        })
                    }),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(tables)
    }

    async fn delete_route(&self, route_table_id: &str, destination_cidr: &str) -> Result<()> {
        let result = self
            .ec2
            .delete_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(destination_cidr)
            .send()
            .await;
        ignore_not_found(result).context("Failed to delete route")?;
        Ok(())
    }

    async fn disassociate_route_table(&self, association_id: &str) -> Result<()> {
        let result = self
            .ec2
            .disassociate_route_table()
            .association_id(association_id)
            .send()
            .await;
        ignore_not_found(result).context("Failed to disassociate route table")?;
        Ok(())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> Result<()> {
        let result = self
            .ec2
            .delete_route_table()
            .route_table_id(route_table_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete route table")? {
            Some(_) => info!(route_table_id = %route_table_id, "Route table deleted"),
            None => debug!(route_table_id = %route_table_id, "Route table already deleted"),
        }
        Ok(())
    }

    async fn list_internet_gateways(&self, vpc_id: &str) -> Result<Vec<InternetGatewaySummary>> {
        let mut gateways = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_internet_gateways()
                .filters(
                    Filter::builder()
                        .name("attachment.vpc-id")
                        .values(vpc_id)
                        .build(),
                )
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe internet gateways")?;

            gateways.extend(
                page.internet_gateways()
                    .iter()
                    .filter_map(internet_gateway_summary),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(gateways)
    }

    async fn get_internet_gateway(&self, igw_id: &str) -> Result<Option<InternetGatewaySummary>> {
        let result = self
            .ec2
            .describe_internet_gateways()
            .internet_gateway_ids(igw_id)
            .send()
            .await;
        Ok(ignore_not_found(result)
            .context("Failed to describe internet gateway")?
            .and_then(|out| out.internet_gateways().iter().find_map(internet_gateway_summary)))
    }

    async fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> Result<()> {
        let result = self
            .ec2
            .detach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await;
        if ignore_not_found(result)
            .context("Failed to detach internet gateway")?
            .is_some()
        {
            info!(igw_id = %igw_id, vpc_id = %vpc_id, "Internet gateway detached");
        }
        Ok(())
    }

    async fn delete_internet_gateway(&self, igw_id: &str) -> Result<()> {
        let result = self
            .ec2
            .delete_internet_gateway()
            .internet_gateway_id(igw_id)
            .send()
            .await;
        match ignore_not_found(result).context("Failed to delete internet gateway")? {
            Some(_) => info!(igw_id = %igw_id, "Internet gateway deleted"),
            None => debug!(igw_id = %igw_id, "Internet gateway already deleted"),
        }
        Ok(())
    }

    async fn list_subnets(&self, vpc_id: &str) -> Result<Vec<SubnetSummary>> {
        let mut subnets = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .ec2
                .describe_subnets()
                .filters(vpc_filter(vpc_id))
                .set_next_token(next_token)
                .send()
                .await
                .context("Failed to describe subnets")?;

            subnets.extend(
                page.subnets()
                    .iter()
                    .filter_map(|s| {
                        Some(SubnetSummary {
                            id: s.subnet_id()?.to_string(),
                        })
                    }),
            );
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(subnets)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let result = self.ec2.delete_subnet().subnet_id(subnet_id).send().await;
        match ignore_not_found(result).context("Failed to delete subnet")? {
            Some(_) => info!(subnet_id = %subnet_id, "Subnet deleted"),
            None => debug!(subnet_id = %subnet_id, "Subnet already deleted"),
        }
        Ok(())
    }
}

fn internet_gateway_summary(
    gw: &aws_sdk_ec2::types::InternetGateway,
) -> Option<InternetGatewaySummary> {
    Some(InternetGatewaySummary {
        id: gw.internet_gateway_id()?.to_string(),
        attached_vpcs: gw
            .attachments()
            .iter()
            .filter_map(|a| a.vpc_id())
            .map(str::to_string)
            .collect(),
    })
}
