//! Terraform configuration generation and CLI invocation.
//!
//! The multi-region layout is string-templated from the region list: one
//! aliased AWS provider per region plus vpc/security_group/ec2 module blocks,
//! with outputs keyed by the human region name. Duplicate regions in the list
//! get a numeric resource suffix. The runner shells out to the `terraform`
//! binary; each command is attempted exactly once.

use std::fs;
use std::path::Path;
use std::process::Command;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{info, warn};

use crate::config::Config;
use crate::regions::{fallback_ami, region_name};

/// Resolve the latest Amazon Linux 2 AMI per region via the AWS CLI,
/// falling back to the static table when the lookup fails.
pub fn resolve_ami_ids(regions: &[String]) -> Vec<(String, String)> {
    let mut ami_ids = Vec::new();
    for region in regions {
        let result = Command::new("aws")
            .args(["ec2", "describe-images", "--region", region])
            .args(["--owners", "amazon"])
            .args([
                "--filters",
                "Name=name,Values=amzn2-ami-hvm-2.*-x86_64-gp2",
                "Name=state,Values=available",
            ])
            .args([
                "--query",
                "sort_by(Images, &CreationDate)[-1].ImageId",
                "--output",
                "text",
            ])
            .output();

        let ami = match result {
            Ok(output) if output.status.success() => {
                let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if id.starts_with("ami-") {
                    info!("Region {}: found latest AMI {}", region, id);
                    id
                } else {
                    warn!(
                        "Region {}: no AMI found, using fallback {}",
                        region,
                        fallback_ami(region)
                    );
                    fallback_ami(region).to_string()
                }
            }
            _ => {
                warn!(
                    "Region {}: AMI lookup failed, using fallback {}",
                    region,
                    fallback_ami(region)
                );
                fallback_ami(region).to_string()
            }
        };
        ami_ids.push((region.clone(), ami));
    }
    ami_ids
}

/// Resource name for the i-th occurrence of a region in the list
fn resource_label(regions: &[String], index: usize) -> String {
    let region = &regions[index];
    let occurrence = regions[..=index].iter().filter(|r| *r == region).count();
    let name = region_name(region);
    if occurrence == 1 {
        name
    } else {
        format!("{}_{}", name, occurrence)
    }
}

fn generate_provider_tf(regions: &[String]) -> String {
    let mut content = String::from(
        "# Auto-generated provider.tf from config.json\n\
         # DO NOT EDIT MANUALLY\n\n\
         terraform {\n\
         \x20 required_version = \">= 0.14.0\"\n\
         \x20 required_providers {\n\
         \x20   aws = {\n\
         \x20     source  = \"hashicorp/aws\"\n\
         \x20     version = \"~> 4.0\"\n\
         \x20   }\n\
         \x20 }\n\
         }\n\n",
    );

    for region in regions {
        content.push_str(&format!(
            "provider \"aws\" {{\n  alias  = \"{region}\"\n  region = \"{region}\"\n}}\n\n"
        ));
    }
    content
}

fn generate_main_tf(config: &Config) -> String {
    let regions = &config.aws_regions;
    let mut content = String::from(
        "# Auto-generated main.tf from config.json\n# DO NOT EDIT MANUALLY\n\n",
    );

    for (i, region) in regions.iter().enumerate() {
        let label = resource_label(regions, i);
        let count = config.instances_for(region);

        content.push_str(&format!(
            "# Resources for {label} region\n\
             module \"vpc_{label}\" {{\n\
             \x20 source = \"./modules/vpc\"\n\n\
             \x20 providers = {{\n    aws = aws.{region}\n  }}\n\n\
             \x20 region            = \"{region}\"\n\
             \x20 vpc_cidr_block    = var.vpc_cidr_blocks[\"{region}\"]\n\
             \x20 subnet_cidr_block = var.subnet_cidr_blocks[\"{region}\"]\n\
             \x20 project_tags      = var.project_tags\n\
             }}\n\n\
             module \"security_group_{label}\" {{\n\
             \x20 source = \"./modules/security_group\"\n\n\
             \x20 providers = {{\n    aws = aws.{region}\n  }}\n\n\
             \x20 vpc_id       = module.vpc_{label}.vpc_id\n\
             \x20 project_tags = var.project_tags\n\
             }}\n\n\
             module \"ec2_instance_{label}\" {{\n\
             \x20 source = \"./modules/ec2\"\n\n\
             \x20 providers = {{\n    aws = aws.{region}\n  }}\n\n\
             \x20 region            = \"{region}\"\n\
             \x20 instance_type     = var.instance_type\n\
             \x20 ami_id            = var.ami_ids[\"{region}\"]\n\
             \x20 key_name          = var.key_name\n\
             \x20 subnet_id         = module.vpc_{label}.subnet_id\n\
             \x20 security_group_id = module.security_group_{label}.security_group_id\n\
             \x20 instance_count    = {count}\n\
             \x20 project_tags      = var.project_tags\n\
             }}\n\n"
        ));
    }
    content
}

fn generate_variables_tf(config: &Config, ami_ids: &[(String, String)]) -> String {
    let regions = &config.aws_regions;

    let regions_list = regions
        .iter()
        .map(|r| format!("\"{}\"", r))
        .collect::<Vec<_>>()
        .join(", ");

    let ami_block = ami_ids
        .iter()
        .map(|(region, ami)| format!("    \"{}\" = \"{}\" # {}", region, ami, region_name(region)))
        .collect::<Vec<_>>()
        .join("\n");

    // Non-overlapping 10.<i>.0.0/16 per region
    let vpc_cidrs = regions
        .iter()
        .enumerate()
        .map(|(i, region)| format!("    \"{}\" = \"10.{}.0.0/16\"", region, i))
        .collect::<Vec<_>>()
        .join("\n");
    let subnet_cidrs = regions
        .iter()
        .enumerate()
        .map(|(i, region)| format!("    \"{}\" = \"10.{}.1.0/24\"", region, i))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# Auto-generated variables.tf from config.json\n\
         # DO NOT EDIT MANUALLY\n\n\
         variable \"aws_regions\" {{\n\
         \x20 description = \"AWS regions where EC2 instances will be deployed\"\n\
         \x20 type        = list(string)\n\
         \x20 default     = [{regions_list}]\n\
         }}\n\n\
         variable \"instance_type\" {{\n\
         \x20 description = \"EC2 instance type\"\n\
         \x20 type        = string\n\
         \x20 default     = \"{instance_type}\"\n\
         }}\n\n\
         variable \"ami_ids\" {{\n\
         \x20 description = \"AMI IDs for each region (Amazon Linux 2)\"\n\
         \x20 type        = map(string)\n\
         \x20 default     = {{\n{ami_block}\n  }}\n\
         }}\n\n\
         variable \"key_name\" {{\n\
         \x20 description = \"SSH key name for EC2 instances\"\n\
         \x20 type        = string\n\
         \x20 default     = \"{key_name}\"\n\
         }}\n\n\
         variable \"vpc_cidr_blocks\" {{\n\
         \x20 description = \"CIDR blocks for VPCs in each region\"\n\
         \x20 type        = map(string)\n\
         \x20 default     = {{\n{vpc_cidrs}\n  }}\n\
         }}\n\n\
         variable \"subnet_cidr_blocks\" {{\n\
         \x20 description = \"CIDR blocks for subnets in each region\"\n\
         \x20 type        = map(string)\n\
         \x20 default     = {{\n{subnet_cidrs}\n  }}\n\
         }}\n\n\
         variable \"instance_count\" {{\n\
         \x20 description = \"Number of EC2 instances to create in each region\"\n\
         \x20 type        = number\n\
         \x20 default     = {instance_count}\n\
         }}\n\n\
         variable \"project_tags\" {{\n\
         \x20 description = \"Tags for resources\"\n\
         \x20 type        = map(string)\n\
         \x20 default     = {{\n\
         \x20   Project = \"aws-network-benchmark\"\n\
         \x20   Owner   = \"DevOps\"\n\
         \x20 }}\n\
         }}\n",
        regions_list = regions_list,
        instance_type = config.instance_type,
        ami_block = ami_block,
        key_name = config.ssh_key_name,
        vpc_cidrs = vpc_cidrs,
        subnet_cidrs = subnet_cidrs,
        instance_count = config.instance_count,
    )
}

fn generate_outputs_tf(regions: &[String]) -> String {
    let mut vpc_ids = Vec::new();
    let mut subnet_ids = Vec::new();
    let mut public_ips = Vec::new();
    let mut private_ips = Vec::new();

    for (i, _) in regions.iter().enumerate() {
        let label = resource_label(regions, i);
        vpc_ids.push(format!("    \"{label}\" = module.vpc_{label}.vpc_id"));
        subnet_ids.push(format!("    \"{label}\" = module.vpc_{label}.subnet_id"));
        public_ips.push(format!(
            "    \"{label}\" = module.ec2_instance_{label}.public_ips"
        ));
        private_ips.push(format!(
            "    \"{label}\" = module.ec2_instance_{label}.private_ips"
        ));
    }

    format!(
        "# Auto-generated outputs.tf from config.json\n\
         # DO NOT EDIT MANUALLY\n\n\
         output \"vpc_ids\" {{\n\
         \x20 description = \"IDs of the created VPCs\"\n\
         \x20 value = {{\n{}\n  }}\n\
         }}\n\n\
         output \"subnet_ids\" {{\n\
         \x20 description = \"IDs of the created subnets\"\n\
         \x20 value = {{\n{}\n  }}\n\
         }}\n\n\
         output \"instance_public_ips\" {{\n\
         \x20 description = \"Public IPs of the created EC2 instances\"\n\
         \x20 value = {{\n{}\n  }}\n\
         }}\n\n\
         output \"instance_private_ips\" {{\n\
         \x20 description = \"Private IPs of the created EC2 instances\"\n\
         \x20 value = {{\n{}\n  }}\n\
         }}\n",
        vpc_ids.join("\n"),
        subnet_ids.join("\n"),
        public_ips.join("\n"),
        private_ips.join("\n"),
    )
}

/// Generate provider.tf, main.tf, variables.tf and outputs.tf into
/// `terraform_dir`
pub fn generate_configs(config: &Config, terraform_dir: &Path) -> Result<()> {
    fs::create_dir_all(terraform_dir).wrap_err_with(|| {
        format!(
            "Failed to create terraform directory '{}'",
            terraform_dir.display()
        )
    })?;

    let ami_ids = resolve_ami_ids(&config.aws_regions);

    let files = [
        ("provider.tf", generate_provider_tf(&config.aws_regions)),
        ("main.tf", generate_main_tf(config)),
        ("variables.tf", generate_variables_tf(config, &ami_ids)),
        ("outputs.tf", generate_outputs_tf(&config.aws_regions)),
    ];
    for (name, content) in files {
        let path = terraform_dir.join(name);
        fs::write(&path, content)
            .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
        info!("Generated {:?} for {} regions", path, config.aws_regions.len());
    }

    Ok(())
}

fn run_terraform(terraform_dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    info!("Executing: terraform {}", args.join(" "));
    let output = Command::new("terraform")
        .args(args)
        .current_dir(terraform_dir)
        .output()
        .wrap_err("Failed to execute terraform; is the binary on PATH?")?;

    if !output.stdout.is_empty() {
        info!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
    }
    if !output.stderr.is_empty() {
        warn!("Stderr: {}", String::from_utf8_lossy(&output.stderr).trim_end());
    }
    Ok(output)
}

pub fn init(terraform_dir: &Path) -> Result<()> {
    let output = run_terraform(terraform_dir, &["init"])?;
    if !output.status.success() {
        return Err(eyre!("terraform init failed"));
    }
    Ok(())
}

pub fn apply(terraform_dir: &Path) -> Result<()> {
    let output = run_terraform(terraform_dir, &["apply", "-auto-approve"])?;
    if !output.status.success() {
        return Err(eyre!("terraform apply failed"));
    }
    Ok(())
}

/// Best-effort destroy; failure is reported, not propagated
pub fn destroy(terraform_dir: &Path) -> bool {
    match run_terraform(terraform_dir, &["destroy", "-auto-approve"]) {
        Ok(output) if output.status.success() => true,
        Ok(_) => {
            warn!("terraform destroy failed. Resources may need manual cleanup.");
            false
        }
        Err(e) => {
            warn!("terraform destroy could not be executed: {}", e);
            false
        }
    }
}

/// Parsed `terraform output -json`
pub fn output_json(terraform_dir: &Path) -> Result<serde_json::Value> {
    let output = run_terraform(terraform_dir, &["output", "-json"])?;
    if !output.status.success() {
        return Err(eyre!("terraform output failed"));
    }
    serde_json::from_slice(&output.stdout).wrap_err("Invalid JSON from terraform output")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(regions: &[&str]) -> Config {
        let json = serde_json::json!({ "aws_regions": regions });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_provider_tf_has_alias_per_region() {
        let content = generate_provider_tf(&["us-east-1".to_string(), "eu-west-2".to_string()]);
        assert!(content.contains("alias  = \"us-east-1\""));
        assert!(content.contains("alias  = \"eu-west-2\""));
        assert!(content.contains("required_version"));
    }

    #[test]
    fn test_main_tf_modules_per_region() {
        let config = test_config(&["us-east-1", "eu-west-2"]);
        let content = generate_main_tf(&config);
        assert!(content.contains("module \"vpc_virginia\""));
        assert!(content.contains("module \"ec2_instance_london\""));
        assert!(content.contains("aws = aws.eu-west-2"));
    }

    #[test]
    fn test_duplicate_region_gets_suffix() {
        let regions = vec!["us-east-1".to_string(), "us-east-1".to_string()];
        assert_eq!(resource_label(&regions, 0), "virginia");
        assert_eq!(resource_label(&regions, 1), "virginia_2");
    }

    #[test]
    fn test_variables_tf_cidrs_do_not_overlap() {
        let config = test_config(&["us-east-1", "eu-west-2", "ap-northeast-1"]);
        let ami_ids: Vec<(String, String)> = config
            .aws_regions
            .iter()
            .map(|r| (r.clone(), fallback_ami(r).to_string()))
            .collect();
        let content = generate_variables_tf(&config, &ami_ids);
        assert!(content.contains("\"us-east-1\" = \"10.0.0.0/16\""));
        assert!(content.contains("\"eu-west-2\" = \"10.1.0.0/16\""));
        assert!(content.contains("\"ap-northeast-1\" = \"10.2.1.0/24\""));
    }

    #[test]
    fn test_outputs_tf_keys_use_region_names() {
        let content = generate_outputs_tf(&["us-east-1".to_string(), "eu-west-2".to_string()]);
        assert!(content.contains("\"virginia\" = module.ec2_instance_virginia.public_ips"));
        assert!(content.contains("\"london\" = module.ec2_instance_london.private_ips"));
    }

    #[test]
    fn test_generate_configs_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&["us-east-1"]);
        // AMI lookup falls back when the AWS CLI is unavailable
        generate_configs(&config, dir.path()).unwrap();
        for name in ["provider.tf", "main.tf", "variables.tf", "outputs.tf"] {
            assert!(dir.path().join(name).exists(), "{} missing", name);
        }
    }
}
