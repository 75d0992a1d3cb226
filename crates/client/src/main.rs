mod net;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;

use net::{ClientCommand, ClientConfig, ClientEvent};
use physync::{BodyDescriptor, MotionType, Shape};

/// Headless demo/integration client: joins (and optionally creates) a room,
/// starts the simulation, and logs the reconciled state stream as it arrives.
#[derive(Parser)]
#[command(name = "physync-client")]
#[command(about = "Headless room-sync client")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = physync::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = "demo-room")]
    room: String,

    /// Create the room (with one dynamic box) instead of only joining it.
    #[arg(long)]
    create: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid host/port")?;

    let (commands, mut events) = net::client::spawn(addr, ClientConfig::default());

    if args.create {
        commands
            .send(ClientCommand::CreateRoom {
                room_id: args.room.clone(),
                initial_bodies: vec![BodyDescriptor::new(
                    "box-1",
                    Shape::Box { half_extents: Vec3::splat(0.5) },
                    MotionType::Dynamic,
                    Vec3::new(0.0, 5.0, 0.0),
                )],
                gravity: None,
                initial_constraints: vec![],
            })
            .await
            .context("client task shut down before create_room could be sent")?;
    }

    commands
        .send(ClientCommand::JoinRoom { room_id: args.room.clone() })
        .await
        .context("client task shut down before join_room could be sent")?;

    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::RoomCreated { room_id } => {
                log::info!("room created: {room_id}");
            }
            ClientEvent::RoomJoined { room_id, client_id, simulation_running, body_count } => {
                log::info!(
                    "joined room {room_id} as client {client_id} ({body_count} bodies, simulation running: {simulation_running})"
                );
                if args.create {
                    commands.send(ClientCommand::StartSimulation).await.ok();
                }
            }
            ClientEvent::SimulationStarted { body_count } => {
                log::info!("simulation started with {body_count} bodies");
            }
            ClientEvent::BodyAdded { body_id, body_index } => {
                log::info!("body added: {body_id} (index {body_index})");
            }
            ClientEvent::BodyRemoved { body_id } => {
                log::info!("body removed: {body_id}");
            }
            ClientEvent::CollisionEvents { tick, events } => {
                log::debug!("tick {tick}: {} collision event(s)", events.len());
            }
            ClientEvent::StateUpdated { local, remote } => {
                log::debug!("state update: {} local, {} remote", local.len(), remote.len());
            }
            ClientEvent::ServerError { message } => {
                log::warn!("server error: {message}");
            }
            ClientEvent::Disconnected => {
                log::info!("disconnected from server");
                break;
            }
        }
    }

    Ok(())
}
