//! AWS region naming tables.
//!
//! Terraform resource names cannot contain hyphens the way region codes do,
//! so generated modules and output keys use a short human name per region.
//! The fallback AMI table is used when `aws ec2 describe-images` cannot be
//! reached; the ids are the stock Amazon Linux 2 images per region.

/// Map an AWS region code to the human name used in generated Terraform
pub fn region_name(region_code: &str) -> String {
    match region_code {
        "us-east-1" => "virginia".to_string(),
        "us-east-2" => "ohio".to_string(),
        "us-west-1" => "california".to_string(),
        "us-west-2" => "oregon".to_string(),
        "eu-west-1" => "ireland".to_string(),
        "eu-west-2" => "london".to_string(),
        "eu-central-1" => "frankfurt".to_string(),
        "ap-northeast-1" => "tokyo".to_string(),
        "ap-northeast-2" => "seoul".to_string(),
        "ap-southeast-1" => "singapore".to_string(),
        "ap-southeast-2" => "sydney".to_string(),
        "ap-south-1" => "mumbai".to_string(),
        "sa-east-1" => "saopaulo".to_string(),
        "ca-central-1" => "canada".to_string(),
        _ => region_code.replace('-', "_"),
    }
}

/// Map a Terraform output key (human name) back to its AWS region code.
/// Unrecognized keys are returned unchanged so ad-hoc region codes pass
/// straight through.
pub fn region_code(name: &str) -> String {
    match name {
        "virginia" => "us-east-1".to_string(),
        "ohio" => "us-east-2".to_string(),
        "california" => "us-west-1".to_string(),
        "oregon" => "us-west-2".to_string(),
        "ireland" => "eu-west-1".to_string(),
        "london" => "eu-west-2".to_string(),
        "frankfurt" => "eu-central-1".to_string(),
        "tokyo" => "ap-northeast-1".to_string(),
        "seoul" => "ap-northeast-2".to_string(),
        "singapore" => "ap-southeast-1".to_string(),
        "sydney" => "ap-southeast-2".to_string(),
        "mumbai" => "ap-south-1".to_string(),
        "saopaulo" => "sa-east-1".to_string(),
        "canada" => "ca-central-1".to_string(),
        _ => name.to_string(),
    }
}

/// Fallback Amazon Linux 2 AMI id for a region
pub fn fallback_ami(region_code: &str) -> &'static str {
    match region_code {
        "us-east-1" => "ami-0c02fb55956c7d316",
        "us-east-2" => "ami-05bfbece1ed5beb54",
        "us-west-1" => "ami-0ed05376b59b90e46",
        "us-west-2" => "ami-0cea098ed2ac54925",
        "eu-west-1" => "ami-04dd4500af104442f",
        "eu-west-2" => "ami-0d729d2846a86a9e7",
        "eu-central-1" => "ami-05d34d340fb1d89e5",
        "ap-northeast-1" => "ami-0218d08a1f9dac831",
        "ap-northeast-2" => "ami-0eb14fe5735c13eb5",
        "ap-southeast-1" => "ami-0dc5785603ad4ff54",
        "ap-southeast-2" => "ami-0bd2230cfb28832f7",
        "ap-south-1" => "ami-052cef05d01020f1d",
        "sa-east-1" => "ami-0aba04ec907f2e05b",
        "ca-central-1" => "ami-0843f7c45354d48b5",
        _ => "ami-0000000000000000",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_name_round_trip() {
        assert_eq!(region_name("us-east-1"), "virginia");
        assert_eq!(region_code("virginia"), "us-east-1");
        assert_eq!(region_name("ap-northeast-1"), "tokyo");
        assert_eq!(region_code("tokyo"), "ap-northeast-1");
    }

    #[test]
    fn test_unknown_region_passthrough() {
        assert_eq!(region_name("eu-north-1"), "eu_north_1");
        assert_eq!(region_code("eu-north-1"), "eu-north-1");
    }

    #[test]
    fn test_fallback_ami_default() {
        assert_eq!(fallback_ami("nowhere-9"), "ami-0000000000000000");
        assert!(fallback_ami("eu-west-2").starts_with("ami-"));
    }
}
