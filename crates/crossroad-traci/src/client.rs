//! The blocking TraCI TCP client.
//!
//! [`TraciClient`] speaks the framed protocol from [`protocol`] over a
//! `std::net::TcpStream` with read/write timeouts, and implements the
//! [`ControlSession`] trait. Connecting performs the full secondary
//! attach: version handshake, then `SetOrder` with an order strictly
//! greater than the primary driver so this client never races it for
//! control authority.
//!
//! [`protocol`]: crate::protocol

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crossroad_core::session::{ControlSession, SessionError};
use crossroad_types::VehicleState;
use tracing::{debug, info};

use crate::protocol::{
    self, Decoder, Encoder, RawCommand, CMD_CLOSE, CMD_GET_SIM_VARIABLE, CMD_GET_TL_VARIABLE,
    CMD_GET_VEHICLE_VARIABLE, CMD_GET_VERSION, CMD_SET_ORDER, CMD_SET_TL_VARIABLE, CMD_SIM_STEP,
    POSITION_2D, STATUS_OK, TL_RED_YELLOW_GREEN_STATE, TYPE_DOUBLE, TYPE_STRING, TYPE_STRINGLIST,
    VAR_ANGLE, VAR_ID_LIST, VAR_MIN_EXPECTED_VEHICLES, VAR_POSITION, VAR_SPEED,
};

/// Execution order declared by the relay: the primary driver is
/// client #1, this relay is always the observing client #2.
pub const SECONDARY_CLIENT_ORDER: i32 = 2;

/// Timeout applied to every read and write on the control socket.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Run blocking socket I/O without starving the async runtime.
///
/// On a multi-threaded tokio runtime a stalled engine would otherwise
/// pin a worker thread for the full [`IO_TIMEOUT`], so the closure
/// runs under [`tokio::task::block_in_place`] there. In sync contexts
/// and on a current-thread runtime, where `block_in_place` is not
/// available, it runs inline.
fn with_blocking_io<T>(f: impl FnOnce() -> T) -> T {
    use tokio::runtime::{Handle, RuntimeFlavor};
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// A live TraCI control session.
#[derive(Debug)]
pub struct TraciClient {
    stream: TcpStream,
    closed: bool,
}

impl TraciClient {
    /// Connect to a TraCI server and attach as the secondary client.
    ///
    /// Performs the version handshake and declares
    /// [`SECONDARY_CLIENT_ORDER`]. Any failure here counts as "engine
    /// not ready yet" to the discovery loop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the connection, handshake, or
    /// ordering declaration fails.
    pub fn connect(addr: SocketAddr) -> Result<Self, SessionError> {
        let stream = with_blocking_io(|| TcpStream::connect_timeout(&addr, IO_TIMEOUT))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream,
            closed: false,
        };

        let (api_version, server_version) = client.get_version()?;
        client.set_order(SECONDARY_CLIENT_ORDER)?;
        info!(
            %addr,
            api_version,
            server = %server_version,
            order = SECONDARY_CLIENT_ORDER,
            "TraCI session established"
        );
        Ok(client)
    }

    /// Exchange the version handshake.
    fn get_version(&mut self) -> Result<(i32, String), SessionError> {
        let body = self.exchange(CMD_GET_VERSION, &[])?;
        let result = find_command(&body, CMD_GET_VERSION)?;
        let mut dec = Decoder::new(result.payload);
        let api_version = dec.take_i32().map_err(protocol_error)?;
        let server_version = dec.take_string().map_err(protocol_error)?;
        Ok((api_version, server_version))
    }

    /// Declare this client's execution order.
    fn set_order(&mut self, order: i32) -> Result<(), SessionError> {
        let mut enc = Encoder::new();
        enc.put_i32(order);
        self.exchange(CMD_SET_ORDER, &enc.into_bytes())?;
        Ok(())
    }

    /// Send one command and read back the response message body,
    /// verifying the status for the sent command.
    fn exchange(&mut self, command_id: u8, payload: &[u8]) -> Result<Vec<u8>, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let message = protocol::frame_message(&[protocol::frame_command(command_id, payload)]);
        let body = with_blocking_io(|| -> Result<Vec<u8>, SessionError> {
            self.stream.write_all(&message)?;
            self.read_message()
        })?;
        check_status(&body, command_id)?;
        Ok(body)
    }

    /// Read one length-prefixed message, returning the body after the
    /// 4-byte length field.
    fn read_message(&mut self) -> Result<Vec<u8>, SessionError> {
        let mut len_bytes = [0_u8; 4];
        self.stream.read_exact(&mut len_bytes)?;
        let total = i32::from_be_bytes(len_bytes);
        if total < 4 {
            return Err(SessionError::Protocol {
                message: format!("nonsensical message length {total}"),
            });
        }
        let mut body = vec![0_u8; (total - 4) as usize];
        self.stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// Retrieve one typed variable for a domain object.
    ///
    /// Returns a decoder positioned at the value's type marker.
    fn get_variable<'a>(
        &mut self,
        command_id: u8,
        response_id: u8,
        variable: u8,
        object_id: &str,
        body: &'a mut Vec<u8>,
    ) -> Result<Decoder<'a>, SessionError> {
        let mut enc = Encoder::new();
        enc.put_u8(variable).put_string(object_id);
        *body = self.exchange(command_id, &enc.into_bytes())?;

        let result = find_command(body, response_id)?;
        let mut dec = Decoder::new(result.payload);
        // Result payload echoes the variable and object id before the
        // typed value.
        let echoed_var = dec.take_u8().map_err(protocol_error)?;
        if echoed_var != variable {
            return Err(SessionError::Protocol {
                message: format!(
                    "server answered variable {echoed_var:#04x}, asked for {variable:#04x}"
                ),
            });
        }
        dec.take_string().map_err(protocol_error)?;
        Ok(dec)
    }

    fn get_string_list(
        &mut self,
        command_id: u8,
        response_id: u8,
        variable: u8,
        object_id: &str,
    ) -> Result<Vec<String>, SessionError> {
        let mut body = Vec::new();
        let mut dec = self.get_variable(command_id, response_id, variable, object_id, &mut body)?;
        dec.expect_type(TYPE_STRINGLIST).map_err(protocol_error)?;
        dec.take_string_list().map_err(protocol_error)
    }

    fn get_double(
        &mut self,
        command_id: u8,
        response_id: u8,
        variable: u8,
        object_id: &str,
    ) -> Result<f64, SessionError> {
        let mut body = Vec::new();
        let mut dec = self.get_variable(command_id, response_id, variable, object_id, &mut body)?;
        dec.expect_type(TYPE_DOUBLE).map_err(protocol_error)?;
        dec.take_f64().map_err(protocol_error)
    }
}

/// Map a decode failure to a protocol-level session error.
fn protocol_error(e: protocol::DecodeError) -> SessionError {
    SessionError::Protocol {
        message: e.to_string(),
    }
}

/// Verify the status command for `command_id` reports success.
fn check_status(body: &[u8], command_id: u8) -> Result<(), SessionError> {
    let commands = protocol::split_commands(body).map_err(protocol_error)?;
    let status = commands
        .iter()
        .find(|c| c.id == command_id)
        .ok_or_else(|| SessionError::Protocol {
            message: format!("no status for command {command_id:#04x}"),
        })?;

    let mut dec = Decoder::new(status.payload);
    let result = dec.take_u8().map_err(protocol_error)?;
    let description = dec.take_string().unwrap_or_default();
    match result {
        STATUS_OK => Ok(()),
        _ => Err(SessionError::Rejected {
            message: if description.is_empty() {
                format!("command {command_id:#04x} failed with status {result:#04x}")
            } else {
                description
            },
        }),
    }
}

/// Find the result command with the given id.
///
/// For `GetVersion` the status command shares the request id and comes
/// first, so the last match is always the result.
fn find_command(body: &[u8], id: u8) -> Result<RawCommand<'_>, SessionError> {
    let commands = protocol::split_commands(body).map_err(protocol_error)?;
    commands
        .into_iter()
        .filter(|c| c.id == id)
        .last()
        .ok_or_else(|| SessionError::Protocol {
            message: format!("no result command {id:#04x} in response"),
        })
}

impl ControlSession for TraciClient {
    fn step(&mut self) -> Result<(), SessionError> {
        // Target time zero advances exactly one step.
        let mut enc = Encoder::new();
        enc.put_f64(0.0);
        self.exchange(CMD_SIM_STEP, &enc.into_bytes())?;
        Ok(())
    }

    fn vehicle_ids(&mut self) -> Result<Vec<String>, SessionError> {
        self.get_string_list(
            CMD_GET_VEHICLE_VARIABLE,
            protocol::RESPONSE_GET_VEHICLE_VARIABLE,
            VAR_ID_LIST,
            "",
        )
    }

    fn vehicle_state(&mut self, id: &str) -> Result<VehicleState, SessionError> {
        let (x, y) = {
            let mut body = Vec::new();
            let mut dec = self.get_variable(
                CMD_GET_VEHICLE_VARIABLE,
                protocol::RESPONSE_GET_VEHICLE_VARIABLE,
                VAR_POSITION,
                id,
                &mut body,
            )?;
            dec.expect_type(POSITION_2D).map_err(protocol_error)?;
            let x = dec.take_f64().map_err(protocol_error)?;
            let y = dec.take_f64().map_err(protocol_error)?;
            (x, y)
        };
        let speed = self.get_double(
            CMD_GET_VEHICLE_VARIABLE,
            protocol::RESPONSE_GET_VEHICLE_VARIABLE,
            VAR_SPEED,
            id,
        )?;
        let angle = self.get_double(
            CMD_GET_VEHICLE_VARIABLE,
            protocol::RESPONSE_GET_VEHICLE_VARIABLE,
            VAR_ANGLE,
            id,
        )?;

        Ok(VehicleState {
            id: id.to_owned(),
            x,
            y,
            speed,
            angle,
        })
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<String>, SessionError> {
        self.get_string_list(
            CMD_GET_TL_VARIABLE,
            protocol::RESPONSE_GET_TL_VARIABLE,
            VAR_ID_LIST,
            "",
        )
    }

    fn signal_state(&mut self, tls_id: &str) -> Result<String, SessionError> {
        let mut body = Vec::new();
        let mut dec = self.get_variable(
            CMD_GET_TL_VARIABLE,
            protocol::RESPONSE_GET_TL_VARIABLE,
            TL_RED_YELLOW_GREEN_STATE,
            tls_id,
            &mut body,
        )?;
        dec.expect_type(TYPE_STRING).map_err(protocol_error)?;
        dec.take_string().map_err(protocol_error)
    }

    fn set_signal_state(&mut self, tls_id: &str, state: &str) -> Result<(), SessionError> {
        let mut enc = Encoder::new();
        enc.put_u8(TL_RED_YELLOW_GREEN_STATE)
            .put_string(tls_id)
            .put_u8(TYPE_STRING)
            .put_string(state);
        self.exchange(CMD_SET_TL_VARIABLE, &enc.into_bytes())?;
        debug!(tls_id = %tls_id, state = %state, "Signal state set");
        Ok(())
    }

    fn min_expected_vehicles(&mut self) -> Result<u32, SessionError> {
        let mut body = Vec::new();
        let mut dec = self.get_variable(
            CMD_GET_SIM_VARIABLE,
            protocol::RESPONSE_GET_SIM_VARIABLE,
            VAR_MIN_EXPECTED_VEHICLES,
            "",
            &mut body,
        )?;
        dec.expect_type(protocol::TYPE_INTEGER).map_err(protocol_error)?;
        let count = dec.take_i32().map_err(protocol_error)?;
        Ok(count.max(0) as u32)
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        let result = self.exchange(CMD_CLOSE, &[]);
        self.closed = true;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        result.map(|_| ())
    }
}

impl Drop for TraciClient {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::protocol::{frame_command, frame_message, Encoder, STATUS_ERR};

    /// Build a status command frame for a request id.
    fn status_frame(command_id: u8, result: u8, description: &str) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u8(result).put_string(description);
        frame_command(command_id, &enc.into_bytes())
    }

    /// A one-shot fake server: accepts one connection and answers each
    /// received message with the next scripted response body.
    fn fake_server(responses: Vec<Vec<Vec<u8>>>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for commands in responses {
                // Read and discard one request message.
                let mut len_bytes = [0_u8; 4];
                if stream.read_exact(&mut len_bytes).is_err() {
                    return;
                }
                let total = i32::from_be_bytes(len_bytes) as usize;
                let mut body = vec![0_u8; total - 4];
                if stream.read_exact(&mut body).is_err() {
                    return;
                }
                let message = frame_message(&commands);
                if stream.write_all(&message).is_err() {
                    return;
                }
            }
        });
        addr
    }

    fn version_response() -> Vec<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.put_i32(21).put_string("SUMO 1.19.0");
        vec![
            status_frame(CMD_GET_VERSION, STATUS_OK, ""),
            frame_command(CMD_GET_VERSION, &enc.into_bytes()),
        ]
    }

    fn ok_response(command_id: u8) -> Vec<Vec<u8>> {
        vec![status_frame(command_id, STATUS_OK, "")]
    }

    #[test]
    fn connect_handshakes_and_declares_order() {
        let addr = fake_server(vec![version_response(), ok_response(CMD_SET_ORDER)]);
        let client = TraciClient::connect(addr).unwrap();
        drop(client);
    }

    #[test]
    fn vehicle_id_list_is_decoded() {
        let mut value = Encoder::new();
        value.put_u8(VAR_ID_LIST).put_string("");
        value.put_u8(TYPE_STRINGLIST).put_i32(2);
        value.put_string("v0").put_string("v1");

        let addr = fake_server(vec![
            version_response(),
            ok_response(CMD_SET_ORDER),
            vec![
                status_frame(CMD_GET_VEHICLE_VARIABLE, STATUS_OK, ""),
                frame_command(
                    protocol::RESPONSE_GET_VEHICLE_VARIABLE,
                    &value.into_bytes(),
                ),
            ],
        ]);

        let mut client = TraciClient::connect(addr).unwrap();
        let ids = client.vehicle_ids().unwrap();
        assert_eq!(ids, vec!["v0", "v1"]);
    }

    #[test]
    fn rejected_command_surfaces_the_description() {
        let addr = fake_server(vec![
            version_response(),
            ok_response(CMD_SET_ORDER),
            vec![status_frame(
                CMD_SET_TL_VARIABLE,
                STATUS_ERR,
                "unknown traffic light 'J9'",
            )],
        ]);

        let mut client = TraciClient::connect(addr).unwrap();
        let err = client.set_signal_state("J9", "GGGrrrrrrrrr").unwrap_err();
        assert!(!err.is_fatal());
        match err {
            SessionError::Rejected { message } => {
                assert!(message.contains("unknown traffic light"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    // Exercises the block_in_place path: session calls made from an
    // async task on a multi-threaded runtime must not stall it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_calls_work_inside_a_multi_thread_runtime() {
        let addr = fake_server(vec![
            version_response(),
            ok_response(CMD_SET_ORDER),
            ok_response(CMD_SIM_STEP),
        ]);

        let mut client = TraciClient::connect(addr).unwrap();
        client.step().unwrap();
    }

    #[test]
    fn min_expected_vehicles_decodes_integer() {
        let mut value = Encoder::new();
        value.put_u8(VAR_MIN_EXPECTED_VEHICLES).put_string("");
        value.put_u8(protocol::TYPE_INTEGER).put_i32(5);

        let addr = fake_server(vec![
            version_response(),
            ok_response(CMD_SET_ORDER),
            vec![
                status_frame(CMD_GET_SIM_VARIABLE, STATUS_OK, ""),
                frame_command(protocol::RESPONSE_GET_SIM_VARIABLE, &value.into_bytes()),
            ],
        ]);

        let mut client = TraciClient::connect(addr).unwrap();
        assert_eq!(client.min_expected_vehicles().unwrap(), 5);
    }
}
