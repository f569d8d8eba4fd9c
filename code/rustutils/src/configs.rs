/// Read cloud configuration data for a cloud report from a json file.
///
/// See ../../tests/rustutils/cloud-details.json for an example.
///
/// File format:
///
/// An array [...] of objects { ... }, each with the following named fields and value types:
///
///   cloud - string, the name of the cloud provider, eg "aws", "gce", "azure"
///   group - string, a label for the group of runs, usually naming the disk type
///   roachprodArgs - object, optional, string-valued arguments passed when creating any cluster
///      for this cloud
///   machineTypes - object, maps a machine type name to an object with the following fields:
///      roachprodArgs - object, optional, string-valued arguments for creating this machine
///      benchArgs - object, optional, string-valued arguments for the benchmark scripts
///
/// Any field name starting with '#' is reserved for arbitrary comments.
///
/// The same cloud provider may appear in several objects with different groups; all the objects
/// for one provider end up in the same set of reports.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path;

// See above comment block for field documentation.

#[derive(Debug, Default, Clone)]
pub struct MachineConfig {
    pub roachprod_args: BTreeMap<String, String>,
    pub bench_args: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone)]
pub struct CloudDetails {
    pub cloud: String,
    pub group: String,
    pub roachprod_args: BTreeMap<String, String>,

    /// Ordered by machine type name so that every pass over a configuration visits the machine
    /// types in the same order.
    pub machine_types: BTreeMap<String, MachineConfig>,
}

impl CloudDetails {
    pub fn machine_type_names(&self) -> impl Iterator<Item = &str> {
        self.machine_types.keys().map(|k| k.as_str())
    }
}

/// Since the input is human-generated and has optional fields, I've opted to use the generic JSON
/// parser followed by explicit decoding of the fields, rather than a (derived) strongly-typed
/// parser.  That way the error messages can name the offending field.

pub fn read_cloud_details(filename: &str) -> Result<Vec<CloudDetails>> {
    let file = File::open(path::Path::new(filename))
        .with_context(|| format!("Cannot open cloud details file {filename}"))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)
        .with_context(|| format!("Cannot parse cloud details file {filename}"))?;
    parse_cloud_details(&v).with_context(|| format!("In cloud details file {filename}"))
}

/// Read several files and concatenate their contents in order.

pub fn read_all_cloud_details(filenames: &[String]) -> Result<Vec<CloudDetails>> {
    let mut clouds = vec![];
    for filename in filenames {
        clouds.extend(read_cloud_details(filename)?);
    }
    Ok(clouds)
}

pub fn parse_cloud_details(v: &Value) -> Result<Vec<CloudDetails>> {
    let mut clouds = vec![];
    if let Value::Array(objs) = v {
        for obj in objs {
            if let Value::Object(fields) = obj {
                let mut details: CloudDetails = Default::default();
                details.cloud = grab_string(fields, "cloud")?;
                details.group = grab_string(fields, "group")?;
                details.roachprod_args = grab_string_map_opt(fields, "roachprodArgs")?;
                if let Some(Value::Object(machines)) = fields.get("machineTypes") {
                    for (name, machine) in machines {
                        if name.starts_with('#') {
                            continue;
                        }
                        if let Value::Object(mfields) = machine {
                            let config = MachineConfig {
                                roachprod_args: grab_string_map_opt(mfields, "roachprodArgs")?,
                                bench_args: grab_string_map_opt(mfields, "benchArgs")?,
                            };
                            details.machine_types.insert(name.to_string(), config);
                        } else {
                            bail!("Machine type '{name}' must have an object value");
                        }
                    }
                } else {
                    bail!("The field 'machineTypes' is required and must be an object");
                }
                clouds.push(details);
            } else {
                bail!("Expected an object value")
            }
        }
    } else {
        bail!("Expected an array value")
    }
    Ok(clouds)
}

fn grab_string(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    if let Some(Value::String(s)) = fields.get(name) {
        Ok(s.to_string())
    } else {
        bail!("Field '{name}' must be present and have a string value");
    }
}

fn grab_string_map_opt(
    fields: &serde_json::Map<String, Value>,
    name: &str,
) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();
    match fields.get(name) {
        None => {}
        Some(Value::Object(vals)) => {
            for (k, v) in vals {
                if k.starts_with('#') {
                    continue;
                }
                if let Value::String(s) = v {
                    result.insert(k.to_string(), s.to_string());
                } else {
                    bail!("Field '{name}.{k}' must have a string value");
                }
            }
        }
        Some(_) => {
            bail!("Field '{name}' must have an object value");
        }
    }
    Ok(result)
}

// Whitebox test that the reading of configs works.

#[test]
fn test_config() {
    let clouds = read_cloud_details("../tests/rustutils/cloud-details.json").unwrap();
    assert!(clouds.len() == 2);

    let aws = &clouds[0];
    assert!(aws.cloud == "aws");
    assert!(aws.group == "ebs-gp3");
    assert!(aws.roachprod_args.get("aws-zones").map(|s| s.as_str()) == Some("us-east-1a"));
    assert!(aws.machine_type_names().collect::<Vec<&str>>() == vec!["c5.2xlarge", "m5.4xlarge"]);
    let m5 = &aws.machine_types["m5.4xlarge"];
    assert!(m5.roachprod_args.get("aws-machine-type").map(|s| s.as_str()) == Some("m5.4xlarge"));
    assert!(m5.bench_args.is_empty());

    let gce = &clouds[1];
    assert!(gce.cloud == "gce");
    assert!(gce.group == "pd-ssd");
    assert!(gce.roachprod_args.is_empty());
    assert!(gce.machine_types.len() == 1);
    assert!(gce.machine_types["n2-standard-8"].bench_args.get("warehouses").map(|s| s.as_str()) == Some("1000"));
}

#[test]
fn test_config_errors() {
    let bad = |s: &str| parse_cloud_details(&serde_json::from_str(s).unwrap()).is_err();
    assert!(bad(r#"{"cloud":"aws"}"#));
    assert!(bad(r#"[{"group":"x","machineTypes":{}}]"#));
    assert!(bad(r#"[{"cloud":"aws","group":"x"}]"#));
    assert!(bad(r#"[{"cloud":"aws","group":"x","machineTypes":{"a":1}}]"#));
    assert!(bad(r#"[{"cloud":"aws","group":"x","roachprodArgs":{"a":1},"machineTypes":{}}]"#));
    assert!(!bad(r##"[{"cloud":"aws","group":"x","machineTypes":{"#note":"hi"}}]"##));
    assert!(read_cloud_details("../tests/rustutils/no-such-file.json").is_err());
}
