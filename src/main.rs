use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use labfleet::audit::LogAuditSink;
use labfleet::config_loader;
use labfleet::inventory::Inventory;
use labfleet::model::{Dut, Labstation, Servo, ServoSetupType, Vlan};
use labfleet::store::MemoryStore;
use log::info;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Lab fleet inventory: vlans, address allocation and servo topology
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the fleet configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON snapshot holding the inventory (defaults to store.snapshot from the config)
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a vlan and seed its address pool
    VlanCreate {
        name: String,
        #[arg(long)]
        cidr: String,
        #[arg(long, default_value = "")]
        free_start_ip: String,
        #[arg(long, default_value = "")]
        free_end_ip: String,
        /// Address never handed out automatically (repeatable)
        #[arg(long = "reserved-ip")]
        reserved_ips: Vec<String>,
        #[arg(long)]
        zone: Option<String>,
        #[arg(long)]
        realm: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Move a vlan's free range
    VlanUpdate {
        name: String,
        #[arg(long)]
        free_start_ip: Option<String>,
        #[arg(long)]
        free_end_ip: Option<String>,
    },
    /// Show one vlan, or all of them
    VlanShow {
        name: Option<String>,
        /// Include every address record
        #[arg(long, requires = "name")]
        ips: bool,
    },
    VlanDelete { name: String },
    /// List the lowest free addresses of a vlan
    FreeIps {
        vlan: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Bind an address to a host
    Allocate {
        hostname: String,
        #[arg(long, default_value = "")]
        vlan: String,
        /// Specific address instead of the lowest free one
        #[arg(long, default_value = "")]
        ip: String,
        #[arg(long, default_value = "")]
        mac: String,
    },
    /// Drop a host's address binding
    Release { hostname: String },
    LabstationCreate {
        hostname: String,
        #[arg(long, default_value = "")]
        machine: String,
        #[arg(long = "pool")]
        pools: Vec<String>,
    },
    LabstationShow { hostname: String },
    LabstationDelete { hostname: String },
    DutCreate {
        hostname: String,
        #[arg(long, default_value = "")]
        machine: String,
        #[arg(long = "pool")]
        pools: Vec<String>,
        #[command(flatten)]
        servo: ServoArgs,
    },
    /// Update a DUT; without --mask only the given fields change
    DutUpdate {
        hostname: String,
        #[arg(long)]
        machine: Option<String>,
        #[arg(long = "pool")]
        pools: Vec<String>,
        #[command(flatten)]
        servo: ServoArgs,
        /// Detach the servo entirely
        #[arg(long, conflicts_with = "mask")]
        clear_servo: bool,
        /// Explicit field paths, comma separated (e.g. servo.port,pools)
        #[arg(long, value_delimiter = ',')]
        mask: Vec<String>,
    },
    DutShow { hostname: String },
    DutDelete { hostname: String },
}

#[derive(clap::Args, Debug, Default)]
struct ServoArgs {
    /// Labstation (or docker host) serving the servo
    #[arg(long)]
    servo_hostname: Option<String>,
    /// 0 picks the default port
    #[arg(long)]
    servo_port: Option<i32>,
    #[arg(long)]
    servo_serial: Option<String>,
    #[arg(long)]
    servo_container: Option<String>,
    #[arg(long)]
    servo_setup: Option<ServoSetupType>,
}

impl ServoArgs {
    fn to_servo(&self) -> Option<Servo> {
        if self.mask_paths().is_empty() {
            return None;
        }
        Some(Servo {
            hostname: self.servo_hostname.clone().unwrap_or_default(),
            port: self.servo_port.unwrap_or_default(),
            serial: self.servo_serial.clone().unwrap_or_default(),
            docker_container_name: self.servo_container.clone().unwrap_or_default(),
            setup_type: self.servo_setup.unwrap_or_default(),
        })
    }

    fn mask_paths(&self) -> Vec<String> {
        let given = [
            ("servo.hostname", self.servo_hostname.is_some()),
            ("servo.port", self.servo_port.is_some()),
            ("servo.serial", self.servo_serial.is_some()),
            ("servo.docker_container_name", self.servo_container.is_some()),
            ("servo.setup_type", self.servo_setup.is_some()),
        ];
        given
            .iter()
            .filter(|(_, set)| *set)
            .map(|(path, _)| path.to_string())
            .collect()
    }
}

impl Command {
    fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Command::VlanShow { .. }
                | Command::FreeIps { .. }
                | Command::LabstationShow { .. }
                | Command::DutShow { .. }
        )
    }
}

fn run_command(inventory: &Inventory, command: Command) -> Result<Value> {
    let output = match command {
        Command::VlanCreate {
            name,
            cidr,
            free_start_ip,
            free_end_ip,
            reserved_ips,
            zone,
            realm,
            description,
        } => {
            let request = Vlan {
                name,
                cidr_block: cidr,
                free_start_ip,
                free_end_ip,
                reserved_ips,
                zone,
                realm,
                description,
                ..Default::default()
            };
            serde_json::to_value(inventory.create_vlan(&request)?)?
        }
        Command::VlanUpdate {
            name,
            free_start_ip,
            free_end_ip,
        } => {
            let mut mask = Vec::new();
            if free_start_ip.is_some() {
                mask.push("free_start_ip".to_string());
            }
            if free_end_ip.is_some() {
                mask.push("free_end_ip".to_string());
            }
            if mask.is_empty() {
                bail!("vlan-update needs --free-start-ip and/or --free-end-ip");
            }
            let request = Vlan {
                name: name.clone(),
                free_start_ip: free_start_ip.unwrap_or_default(),
                free_end_ip: free_end_ip.unwrap_or_default(),
                ..Default::default()
            };
            serde_json::to_value(inventory.update_vlan(&name, &request, &mask)?)?
        }
        Command::VlanShow { name: None, .. } => serde_json::to_value(inventory.list_vlans()?)?,
        Command::VlanShow {
            name: Some(name),
            ips,
        } => {
            let vlan = inventory.get_vlan(&name)?;
            if ips {
                json!({ "vlan": vlan, "ips": inventory.list_ips(&name)? })
            } else {
                serde_json::to_value(vlan)?
            }
        }
        Command::VlanDelete { name } => serde_json::to_value(inventory.delete_vlan(&name)?)?,
        Command::FreeIps { vlan, limit } => serde_json::to_value(inventory.free_ips(&vlan, limit)?)?,
        Command::Allocate {
            hostname,
            vlan,
            ip,
            mac,
        } => serde_json::to_value(inventory.allocate(&vlan, &ip, &mac, &hostname)?)?,
        Command::Release { hostname } => serde_json::to_value(inventory.release(&hostname)?)?,
        Command::LabstationCreate {
            hostname,
            machine,
            pools,
        } => {
            let request = Labstation {
                machine,
                pools,
                ..Labstation::new(&hostname)
            };
            serde_json::to_value(inventory.create_labstation(&request)?)?
        }
        Command::LabstationShow { hostname } => {
            serde_json::to_value(inventory.get_labstation(&hostname)?)?
        }
        Command::LabstationDelete { hostname } => {
            serde_json::to_value(inventory.delete_labstation(&hostname)?)?
        }
        Command::DutCreate {
            hostname,
            machine,
            pools,
            servo,
        } => {
            let request = Dut {
                machine,
                pools,
                servo: servo.to_servo(),
                ..Dut::new(&hostname)
            };
            serde_json::to_value(inventory.create_dut(&request)?)?
        }
        Command::DutUpdate {
            hostname,
            machine,
            pools,
            servo,
            clear_servo,
            mask,
        } => {
            let mut paths = mask;
            if paths.is_empty() {
                if machine.is_some() {
                    paths.push("machine".to_string());
                }
                if !pools.is_empty() {
                    paths.push("pools".to_string());
                }
                if clear_servo {
                    paths.push("servo".to_string());
                } else {
                    paths.extend(servo.mask_paths());
                }
            }
            if paths.is_empty() {
                bail!("dut-update needs at least one field to change");
            }
            let request = Dut {
                machine: machine.unwrap_or_default(),
                pools,
                servo: if clear_servo { None } else { servo.to_servo() },
                ..Dut::new(&hostname)
            };
            serde_json::to_value(inventory.update_dut(&hostname, &request, &paths)?)?
        }
        Command::DutShow { hostname } => serde_json::to_value(inventory.get_dut(&hostname)?)?,
        Command::DutDelete { hostname } => serde_json::to_value(inventory.delete_dut(&hostname)?)?,
    };
    Ok(output)
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();
    let config = config_loader::load_or_default(args.config.as_deref())?;

    env_logger::Builder::from_env(Env::default().default_filter_or(config.general.log_level.as_str()))
        .init();

    let snapshot = args
        .store
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.snapshot));
    let store = Arc::new(
        MemoryStore::load_snapshot(&snapshot)
            .wrap_err_with(|| format!("Failed to load inventory from '{}'", snapshot.display()))?,
    );
    info!("Inventory snapshot: {:?}", snapshot);

    let mutation = args.command.is_mutation();
    let inventory = Inventory::new(store.clone(), config, Arc::new(LogAuditSink));
    let output = run_command(&inventory, args.command)?;

    if mutation {
        store
            .save_snapshot(&snapshot)
            .wrap_err_with(|| format!("Failed to save inventory to '{}'", snapshot.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labfleet::config::FleetConfig;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from([
            "labfleet",
            "--config", "fleet.yaml",
            "allocate", "host-1",
            "--vlan", "lab-40",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("fleet.yaml")));
        assert_eq!(args.store, None);
        match args.command {
            Command::Allocate { hostname, vlan, ip, .. } => {
                assert_eq!(hostname, "host-1");
                assert_eq!(vlan, "lab-40");
                assert_eq!(ip, "");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dut_update_args() {
        let args = Args::parse_from([
            "labfleet",
            "dut-update", "dut-1",
            "--servo-hostname", "labstation-1",
            "--servo-port", "9990",
            "--servo-setup", "V3",
        ]);

        let Command::DutUpdate { servo, clear_servo, mask, .. } = args.command else {
            panic!("expected dut-update");
        };
        assert!(!clear_servo);
        assert!(mask.is_empty());
        assert_eq!(
            servo.mask_paths(),
            vec!["servo.hostname", "servo.port", "servo.setup_type"]
        );
        let servo = servo.to_servo().unwrap();
        assert_eq!(servo.port, 9990);
        assert_eq!(servo.setup_type, ServoSetupType::V3);
    }

    #[test]
    fn test_mask_is_comma_separated() {
        let args = Args::parse_from([
            "labfleet", "dut-update", "dut-1", "--mask", "servo.port,pools",
        ]);
        let Command::DutUpdate { mask, .. } = args.command else {
            panic!("expected dut-update");
        };
        assert_eq!(mask, vec!["servo.port", "pools"]);
    }

    #[test]
    fn test_run_command_round_trip() {
        let inventory = Inventory::new(
            Arc::new(MemoryStore::new()),
            FleetConfig::default(),
            Arc::new(LogAuditSink),
        );
        let create = Args::parse_from(["labfleet", "vlan-create", "lab-40", "--cidr", "192.168.40.0/22"]);
        run_command(&inventory, create.command).unwrap();

        let allocate = Args::parse_from(["labfleet", "allocate", "host-1", "--vlan", "lab-40"]);
        let output = run_command(&inventory, allocate.command).unwrap();
        assert_eq!(output["ip"], "192.168.40.11");

        let show = Args::parse_from(["labfleet", "vlan-show"]);
        assert!(!show.command.is_mutation());
        let output = run_command(&inventory, show.command).unwrap();
        assert_eq!(output.as_array().map(Vec::len), Some(1));
    }
}
