//! CLI command definitions and handlers.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr, eyre};
use monroot_oci::Spec;

use crate::filesystem::{
    MountOptions, RootSwitch, change_root, find_qemu_data_dir, needs_remount,
};
use crate::namespace::enter_mount_namespace;
use crate::prepare::MonitorRootfs;

/// Monroot - isolated root filesystems for hypervisor monitors
#[derive(Parser)]
#[command(name = "monroot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable.
    Text,
    /// One JSON object per event.
    Json,
}

/// Monroot commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Build the monitor rootfs and switch into it
    Prepare {
        /// Path to the OCI bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Path to the monitor binary on the host
        #[arg(short, long)]
        monitor: PathBuf,

        /// Rootfs directory (default: root.path from config.json)
        #[arg(long)]
        rootfs: Option<PathBuf>,

        /// Snapshotter block device to replicate
        #[arg(long)]
        block_device: Option<PathBuf>,

        /// Replicate /dev/kvm
        #[arg(long)]
        kvm: bool,

        /// Replicate /dev/net/tun
        #[arg(long)]
        tap: bool,

        /// Copy the monitor binary instead of bind mounting it
        #[arg(long)]
        copy_binary: bool,

        /// Use chroot even when a mount namespace is configured
        #[arg(long)]
        no_pivot: bool,

        /// Enter a new mount namespace first
        #[arg(long)]
        unshare: bool,

        /// Print the steps without touching the filesystem
        #[arg(long)]
        dry_run: bool,

        /// Command to exec inside the new root
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Switch the process root into an assembled rootfs
    Switch {
        /// Rootfs directory
        #[arg(long)]
        rootfs: PathBuf,

        /// Use chroot instead of pivot_root
        #[arg(long)]
        no_pivot: bool,

        /// Command to exec inside the new root
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Show how mount options reduce to mount flags
    Flags {
        /// Mount options, in order
        #[arg(required = true)]
        options: Vec<String>,
    },

    /// Print where a share directory is found on the host
    DataDir {
        /// Directory basename (e.g. qemu, seabios)
        name: String,
    },
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Prepare {
                bundle,
                monitor,
                rootfs,
                block_device,
                kvm,
                tap,
                copy_binary,
                no_pivot,
                unshare,
                dry_run,
                command,
            } => {
                let spec = Spec::load(&bundle)?;
                let rootfs = rootfs
                    .or_else(|| spec.rootfs_in(&bundle))
                    .ok_or_else(|| eyre!("No rootfs given and config.json has no root.path"))?;

                let mut builder = MonitorRootfs::from_spec(rootfs, monitor, &spec)
                    .with_kvm(kvm)
                    .with_tap(tap)
                    .with_copy_binary(copy_binary);
                if let Some(device) = block_device {
                    builder = builder.with_block_device(device);
                }
                if no_pivot {
                    builder = builder.with_switch(RootSwitch::Chroot);
                }

                if dry_run {
                    print_plan(&builder)?;
                    return Ok(());
                }

                if unshare {
                    enter_mount_namespace()?;
                }
                builder.prepare()?;
                exec(&command)
            }

            Commands::Switch {
                rootfs,
                no_pivot,
                command,
            } => {
                let switch = if no_pivot {
                    RootSwitch::Chroot
                } else {
                    RootSwitch::Pivot
                };
                change_root(&rootfs, switch)?;
                exec(&command)
            }

            Commands::Flags { options } => {
                let reduced = MountOptions::parse(&options);
                println!("set:         {:?}", reduced.flags);
                println!("clear:       {:?}", reduced.cleared);
                println!(
                    "propagation: {}",
                    reduced
                        .propagation
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                println!("remount:     {}", needs_remount(reduced.flags));
                if !reduced.ignored.is_empty() {
                    println!("ignored:     {}", reduced.ignored.join(", "));
                }
                Ok(())
            }

            Commands::DataDir { name } => {
                let dir = find_qemu_data_dir(&name)?;
                println!("{}", dir.display());
                Ok(())
            }
        }
    }
}

/// Replace the process with `command`, if one was given.
fn exec(command: &[String]) -> Result<()> {
    match command.split_first() {
        Some((program, args)) => {
            let err = Command::new(program).args(args).exec();
            Err(err).wrap_err_with(|| format!("Failed to exec {program}"))
        }
        None => Ok(()),
    }
}

fn print_plan(rootfs: &MonitorRootfs) -> Result<()> {
    println!("rootfs:      {}", rootfs.rootfs().display());
    println!("monitor:     {}", rootfs.monitor().kind);
    println!("propagation: {}", rootfs.propagation()?);
    for (index, step) in rootfs.plan().steps().iter().enumerate() {
        let optional = if step.is_optional() { " (optional)" } else { "" };
        println!("{:>2}. {step}{optional}", index + 1);
    }
    for volume in rootfs.volumes()? {
        println!(
            "bind:        {} -> {} [{:?}]",
            volume.source.display(),
            volume.destination.display(),
            volume.options.flags
        );
    }
    println!("switch:      {}", rootfs.switch());
    Ok(())
}
