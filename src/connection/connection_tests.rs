// Copyright 2025 The quicmux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[cfg(test)]
mod tests {
    use crate::api::Config;
    use crate::api::ConnTime;
    use crate::api::Connection;
    use crate::api::ConnectionEvent;
    use crate::api::ConnectionState;
    use crate::api::Status;
    use crate::api::StreamId;
    use crate::new_connection;
    use crate::packet::frame;
    use crate::packet::frame::Frame;
    use crate::testing::capture::CaptureHandle;
    use crate::testing::capture::CapturingProtection;
    use crate::testing::event_helpers::expect_close_connection;
    use crate::testing::event_helpers::expect_error;
    use crate::testing::event_helpers::expect_new_stream_data;
    use crate::testing::event_helpers::expect_no_event;
    use crate::testing::event_helpers::expect_stream_reset;
    use crate::types::ERROR_CANCELLED;
    use crate::types::PacketNumber;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    const HEADER_LEN: usize = 4;

    fn endpoint(established: bool, mtu: usize) -> (Connection, CaptureHandle) {
        let config = Config { origin_name: "example.org".into(), mtu, ..Config::default() };
        let mut conn = new_connection(&config).unwrap();
        let (layer, handle) = CapturingProtection::new(established, HEADER_LEN);
        conn.set_protection_layer(Box::new(layer));
        (conn, handle)
    }

    fn client(established: bool, mtu: usize) -> (Connection, CaptureHandle) {
        let (mut conn, handle) = endpoint(established, mtu);
        assert!(conn.start_client().is_ok());
        conn.handshake_complete(Status::Ok);
        (conn, handle)
    }

    fn server(established: bool, mtu: usize) -> (Connection, CaptureHandle) {
        let (mut conn, handle) = endpoint(established, mtu);
        assert!(conn.start_server().is_ok());
        conn.handshake_complete(Status::Ok);
        (conn, handle)
    }

    fn stream_frames(payload: &[u8]) -> Vec<(StreamId, u64, Vec<u8>, bool)> {
        let mut frames = Vec::new();
        let mut at = 0;
        while at < payload.len() {
            let (f, n) = frame::parse(&payload[at..]).unwrap();
            if let Frame::Stream(s) = f {
                frames.push((s.stream_id, s.offset, s.data.to_vec(), s.fin));
            }
            at += n;
        }
        frames
    }

    /// Moves every captured datagram from `from` into `to`.
    fn deliver_all(from: &CaptureHandle, to: &mut Connection) {
        while from.sent_count() > 0 {
            let datagram = from.sent.borrow_mut().pop_front().unwrap();
            to.handle_payload(&datagram.payload, datagram.cleartext);
        }
    }

    #[test]
    fn three_bytes_with_fin_arrive_as_one_frame() {
        let (mut client, client_net) = client(true, 1280);
        let (mut server, _) = server(true, 1280);

        let id = client.start_new_stream(b"ABC", true).unwrap();
        assert_eq!(id, StreamId(1));
        assert!(client.io(ConnTime::zero()).is_ok());

        assert_eq!(client_net.sent_count(), 1);
        let payload = client_net.next_payload();
        assert_eq!(stream_frames(&payload), vec![(StreamId(1), 0, b"ABC".to_vec(), true)]);

        assert!(server.handle_payload(&payload, false).is_ok());
        assert_eq!(expect_new_stream_data!(server.poll_event()), StreamId(1));

        let mut buf = [0u8; 16];
        assert_eq!(server.recv(StreamId(1), &mut buf), Ok((3, true)));
        assert_eq!(&buf[..3], b"ABC");
    }

    #[test]
    fn oversized_write_is_split_across_two_datagrams() {
        // End of packet is mtu - 16 (tag); with a 4-byte header and a 4-byte frame header, a
        // 1224-byte MTU leaves a data budget of exactly 1200 bytes.
        let (mut client, client_net) = client(true, 1224);
        let (mut server, _) = server(true, 1280);

        let payload: Vec<u8> = (0..1400u32).map(|i| (i % 251) as u8).collect();
        client.start_new_stream(&payload, true).unwrap();
        assert!(client.io(ConnTime::zero()).is_ok());

        assert_eq!(client_net.sent_count(), 2);
        let first = client_net.next_payload();
        let second = client_net.next_payload();
        assert_eq!(stream_frames(&first), vec![(StreamId(1), 0, payload[..1200].to_vec(), false)]);
        assert_eq!(
            stream_frames(&second),
            vec![(StreamId(1), 1200, payload[1200..].to_vec(), true)]
        );

        server.handle_payload(&first, false);
        server.handle_payload(&second, false);
        let mut buf = vec![0u8; 2048];
        let (n, fin) = server.recv(StreamId(1), &mut buf).unwrap();
        assert_eq!(n, 1400);
        assert!(fin);
        assert_eq!(&buf[..n], &payload[..]);
    }

    #[test]
    fn lost_datagram_is_retransmitted_with_a_new_packet_number() {
        let (mut client, client_net) = client(true, 1224);
        let (mut server, _) = server(true, 1280);

        let payload: Vec<u8> = (0..1400u32).map(|i| (i % 241) as u8).collect();
        client.start_new_stream(&payload, true).unwrap();
        client.io(ConnTime::zero());

        // The first datagram (packet 1) is lost; the second (packet 2) arrives and is acked.
        let _lost = client_net.next_payload();
        let second = client_net.next_payload();
        server.handle_payload(&second, false);
        client.handle_ack(PacketNumber(2));

        // After one retransmit interval the first chunk is re-queued and flushed under a fresh
        // packet number.
        let later = ConnTime::zero() + Duration::from_millis(500);
        assert!(client.io(later).is_ok());
        assert_eq!(client_net.sent_count(), 1);
        let resent = client_net.next_payload();
        assert_eq!(stream_frames(&resent), vec![(StreamId(1), 0, payload[..1200].to_vec(), false)]);
        let fresh_pn = client
            .table
            .unacked
            .iter()
            .find(|chunk| !chunk.data.is_empty())
            .map(|chunk| chunk.packet_number)
            .unwrap();
        assert_eq!(fresh_pn, PacketNumber(3));

        server.handle_payload(&resent, false);
        let mut buf = vec![0u8; 2048];
        assert_eq!(server.recv(StreamId(1), &mut buf).unwrap(), (1400, true));
        assert_eq!(&buf[..1400], &payload[..]);

        // Acks for the retransmission and the original settle the queue completely.
        client.handle_ack(PacketNumber(3));
        client.handle_ack(PacketNumber(1));
        assert!(client.table.unacked.is_empty());
    }

    #[test]
    fn fin_on_stream_zero_tears_the_connection_down() {
        let (mut server, server_net) = server(true, 1280);

        let violation = crate::packet::stream_frame::encode(StreamId(0), 0, b"x", true);
        assert_eq!(server.handle_payload(&violation, true), Status::General);

        let (status, message) = expect_error!(server.poll_event());
        assert_eq!(status, Status::General);
        assert!(message.contains("stream 0"));
        assert_eq!(server.state(), ConnectionState::Error);

        // No further datagrams leave the endpoint.
        assert_eq!(server.send(StreamId(0), b"data", false), Status::General);
        server.io(ConnTime::zero() + Duration::from_secs(5));
        assert_eq!(server_net.sent_count(), 0);
    }

    #[test]
    fn reset_scrubs_unacked_data_and_sends_a_reset_marker() {
        let (mut client, client_net) = client(true, 1280);

        let keep = client.start_new_stream(b"keep", false).unwrap();
        let doomed = client.start_new_stream(&[], false).unwrap();
        assert_eq!(doomed, StreamId(3));
        client.send(doomed, b"first", false);
        client.send(doomed, b"second", false);
        client.io(ConnTime::zero());
        assert_eq!(client_net.sent_count(), 1);
        client_net.next_payload();
        assert_eq!(client.table.unacked.len(), 3);

        assert!(client.reset_stream(doomed, ERROR_CANCELLED).is_ok());
        assert!(client.table.unacked.iter().all(|c| c.stream_id != doomed || c.rst));
        client.io(ConnTime::zero() + Duration::from_millis(1));
        let reset_datagram = client_net.next_payload();
        assert!(stream_frames(&reset_datagram).is_empty());
        let (rst, _) = crate::packet::rst_frame::RstStreamFrame::parse(&reset_datagram).unwrap();
        assert_eq!(rst.stream_id, doomed);
        assert_eq!(rst.final_offset, 11);

        // The scrubbed data is never retransmitted; only the stream that was kept may reappear.
        client.io(ConnTime::zero() + Duration::from_millis(500));
        while client_net.sent_count() > 0 {
            for (id, _, _, _) in stream_frames(&client_net.next_payload()) {
                assert_eq!(id, keep);
            }
        }
    }

    #[test]
    fn flush_without_queued_data_is_a_no_op() {
        let (mut client, client_net) = client(true, 1280);
        assert!(client.flush(false).is_ok());
        client.io(ConnTime::zero());
        assert_eq!(client_net.sent_count(), 0);
        assert!(client.table.unacked.is_empty());
    }

    #[test]
    fn handshake_data_flushes_under_a_long_header_before_keys_exist() {
        let (mut client, client_net) = endpoint(false, 1280);
        client.start_client();

        assert!(client.handshake_output(b"client hello").is_ok());
        client.start_new_stream(b"early app data", false).unwrap();
        client.io(ConnTime::zero());

        // Only stream 0 went out, in cleartext.
        assert_eq!(client_net.sent_count(), 1);
        let datagram = client_net.sent.borrow_mut().pop_front().unwrap();
        assert!(datagram.cleartext);
        assert_eq!(
            stream_frames(&datagram.payload),
            vec![(StreamId(0), 0, b"client hello".to_vec(), false)]
        );

        // Once the handshake delivers keys, the application stream follows protected.
        client_net.established.set(true);
        client.handshake_complete(Status::Ok);
        client.io(ConnTime::zero() + Duration::from_millis(1));
        let datagram = client_net.sent.borrow_mut().pop_front().unwrap();
        assert!(!datagram.cleartext);
        assert_eq!(
            stream_frames(&datagram.payload),
            vec![(StreamId(1), 0, b"early app data".to_vec(), false)]
        );
    }

    #[test]
    fn refused_transmit_leaves_chunks_for_the_timer() {
        let (mut client, client_net) = client(true, 1280);
        client_net.refuse_transmit.set(true);

        client.start_new_stream(b"held", false).unwrap();
        assert_eq!(client.io(ConnTime::zero()), Status::General);
        assert_eq!(client_net.sent_count(), 0);
        assert_eq!(client.table.unacked.len(), 1);

        // The datagram layer recovers; the retransmit sweep re-queues and flushes the chunk.
        client_net.refuse_transmit.set(false);
        client.io(ConnTime::zero() + Duration::from_millis(500));
        assert_eq!(client_net.sent_count(), 1);
        assert_eq!(
            stream_frames(&client_net.next_payload()),
            vec![(StreamId(1), 0, b"held".to_vec(), false)]
        );
    }

    #[test]
    fn back_pressure_pauses_the_flusher() {
        let (mut client, client_net) = client(true, 1280);
        client.start_new_stream(b"waiting", false).unwrap();

        client.start_back_pressure();
        client.io(ConnTime::zero());
        assert_eq!(client_net.sent_count(), 0);

        client.release_back_pressure();
        client.io(ConnTime::zero() + Duration::from_millis(1));
        assert_eq!(client_net.sent_count(), 1);
    }

    #[test]
    fn stop_sending_resets_the_peer_sending_side() {
        let (mut client, client_net) = client(true, 1280);
        let (mut server, server_net) = server(true, 1280);

        client.start_new_stream(b"unwanted", false).unwrap();
        client.io(ConnTime::zero());
        deliver_all(&client_net, &mut server);
        expect_new_stream_data!(server.poll_event());

        assert!(server.stop_sending(StreamId(1), ERROR_CANCELLED).is_ok());
        server.io(ConnTime::zero());
        deliver_all(&server_net, &mut client);

        // Our sending side is abandoned; the queued reset marker settles the stream on a peer
        // that already stopped caring, so no further event is raised there.
        assert_eq!(client.send(StreamId(1), b"more", false), Status::AlreadyFinished);
        client.io(ConnTime::zero() + Duration::from_millis(1));
        deliver_all(&client_net, &mut server);
        expect_no_event!(server.poll_event());
    }

    #[test]
    fn peer_reset_raises_a_stream_reset_event() {
        let (mut client, client_net) = client(true, 1280);
        let (mut server, _) = server(true, 1280);

        client.start_new_stream(b"about to go", false).unwrap();
        client.io(ConnTime::zero());
        deliver_all(&client_net, &mut server);
        expect_new_stream_data!(server.poll_event());

        client.reset_stream(StreamId(1), ERROR_CANCELLED);
        client.io(ConnTime::zero() + Duration::from_millis(1));
        deliver_all(&client_net, &mut server);
        assert_eq!(expect_stream_reset!(server.poll_event()), StreamId(1));
        expect_no_event!(server.poll_event());
    }

    #[test]
    fn events_dispatch_synchronously_through_a_registered_callback() {
        let (mut server, _) = server(true, 1280);
        let seen: Rc<RefCell<Vec<ConnectionEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        server.set_event_callback(Box::new(move |event| sink.borrow_mut().push(event)));

        let payload = crate::packet::stream_frame::encode(StreamId(1), 0, b"cb", false);
        server.handle_payload(&payload, false);

        assert_eq!(*seen.borrow(), vec![ConnectionEvent::NewStreamData(StreamId(1))]);
        expect_no_event!(server.poll_event());
    }

    #[test]
    fn close_emits_a_close_event_and_stops_the_engine() {
        let (mut client, client_net) = client(true, 1280);
        client.start_new_stream(b"data", false).unwrap();
        client.close();

        expect_close_connection!(client.poll_event());
        assert_eq!(client.state(), ConnectionState::Closed);
        client.io(ConnTime::zero() + Duration::from_secs(1));
        assert_eq!(client_net.sent_count(), 0);
    }

    #[test]
    fn chunks_are_labelled_with_the_state_key_phase() {
        let (mut client, client_net) = endpoint(true, 1280);
        client.start_client();
        assert!(client.enter_0rtt().is_ok());

        client.start_new_stream(b"early", false).unwrap();
        client.io(ConnTime::zero());
        client_net.next_payload();
        assert_eq!(client.table.unacked[0].transmit_key_phase, crate::KeyPhase::OneRtt);
    }

    #[test]
    fn applications_cannot_touch_the_handshake_stream() {
        let (mut client, _) = client(true, 1280);
        assert_eq!(client.send(StreamId(0), b"x", false), Status::Invalid);
        assert_eq!(client.end_stream(StreamId(0)), Status::Invalid);
        assert_eq!(client.reset_stream(StreamId(0), ERROR_CANCELLED), Status::Invalid);
        assert_eq!(client.stop_sending(StreamId(0), ERROR_CANCELLED), Status::Invalid);
        // The sanctioned path still reaches stream 0.
        assert!(client.handshake_output(b"hs").is_ok());
    }

    #[test]
    fn io_before_start_fails() {
        let (mut conn, _) = endpoint(true, 1280);
        assert_eq!(conn.io(ConnTime::zero()), Status::General);
        assert!(conn.start_new_stream(b"x", false).is_err());
    }

    #[test]
    fn tuning_flags_are_readable_by_the_handshake_collaborator() {
        let config = Config {
            origin_name: "example.org".into(),
            ignore_pki: true,
            tolerate_bad_alpn: true,
            sabotage_vn: true,
            stream_window: 1234,
            ..Config::default()
        };
        let conn = new_connection(&config).unwrap();
        assert!(conn.ignore_pki());
        assert!(conn.tolerate_bad_alpn());
        assert!(!conn.tolerate_no_transport_params());
        assert!(conn.sabotage_vn());
        assert!(!conn.force_address_validation());
        assert_eq!(conn.config().stream_window, 1234);
        assert_eq!(conn.config().origin_port, 443);
    }

    #[test]
    fn grease_flag_forces_an_invalid_version() {
        let config = Config {
            origin_name: "example.org".into(),
            grease_version_negotiation: true,
            ..Config::default()
        };
        let conn = new_connection(&config).unwrap();
        assert_eq!(conn.version(), 0xfa1a_7a3a);
    }

    #[test]
    fn writes_on_one_stream_are_delivered_in_order() {
        let (mut client, client_net) = client(true, 1280);
        let (mut server, _) = server(true, 1280);

        let id = client.start_new_stream(b"one ", false).unwrap();
        client.send(id, b"two ", false);
        client.send(id, b"three", true);
        client.io(ConnTime::zero());
        deliver_all(&client_net, &mut server);

        let mut buf = [0u8; 32];
        let (n, fin) = server.recv(id, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"one two three");
        assert!(fin);
    }
}
