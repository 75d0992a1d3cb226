use physync::ClientId;

/// Narrates dispatcher activity to whichever front end is attached --
/// the headless logger or the TUI's log panel. Not part of the wire
/// protocol; purely an operability feed.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    RoomCreated { room_id: String },
    ClientConnected { client_id: ClientId, addr: String },
    ClientJoinedRoom { client_id: ClientId, room_id: String },
    ClientLeftRoom { client_id: ClientId, room_id: String },
    ClientDisconnected { client_id: ClientId },
    Error { message: String },
}

impl ServerEvent {
    pub fn describe(&self) -> String {
        match self {
            ServerEvent::RoomCreated { room_id } => format!("room '{room_id}' created"),
            ServerEvent::ClientConnected { client_id, addr } => {
                format!("client {client_id} connected from {addr}")
            }
            ServerEvent::ClientJoinedRoom { client_id, room_id } => {
                format!("client {client_id} joined room '{room_id}'")
            }
            ServerEvent::ClientLeftRoom { client_id, room_id } => {
                format!("client {client_id} left room '{room_id}'")
            }
            ServerEvent::ClientDisconnected { client_id } => {
                format!("client {client_id} disconnected")
            }
            ServerEvent::Error { message } => format!("error: {message}"),
        }
    }
}
