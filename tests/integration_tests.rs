//! Integration tests for the chat server
//!
//! These tests run a real server on an ephemeral port and drive it through the
//! client library's framed connection.

use client::network::Connection;
use server::config::{FailureBound, LockoutPolicy, SessionSettings};
use server::credentials::Credential;
use server::network::Server;
use server::registry::{Registry, SharedRegistry};
use shared::{Packet, PeerSetup};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const LOCKOUT_MESSAGE: &str = "=== Error: Consecutive login failures. Please try again later. ===";

async fn start_server(
    failures: i64,
    window: Duration,
    policy: LockoutPolicy,
) -> (SocketAddr, SharedRegistry) {
    let registry = Registry::new(
        vec![
            Credential::new("alice", "secret"),
            Credential::new("bob", "hunter2"),
            Credential::new("carol", "pa55"),
        ],
        window,
    );
    let settings = SessionSettings {
        failure_bound: FailureBound::new(failures).unwrap(),
        lockout_policy: policy,
    };

    let server = Server::bind("127.0.0.1:0", registry, settings).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shared = server.registry();
    tokio::spawn(server.run());
    (addr, shared)
}

async fn recv(conn: &mut Connection) -> Packet {
    timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("timed out waiting for server")
        .unwrap()
        .expect("server closed the connection")
}

async fn login(addr: SocketAddr, username: &str, password: &str) -> Connection {
    let mut conn = Connection::connect(addr).await.unwrap();
    assert_eq!(recv(&mut conn).await, Packet::prompt("Username: "));
    conn.send_reply(username).await.unwrap();
    assert_eq!(recv(&mut conn).await, Packet::prompt("Password: "));
    conn.send_reply(password).await.unwrap();
    assert_eq!(
        recv(&mut conn).await,
        Packet::notice(format!("Welcome to the chat server, {}!", username))
    );
    conn
}

/// Polls the registry until `check` holds or two seconds pass
async fn wait_until<F>(registry: &SharedRegistry, check: F) -> bool
where
    F: Fn(&Registry) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check(&*registry.read().await) {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

/// LOGIN FLOW TESTS
mod login_tests {
    use super::*;

    #[tokio::test]
    async fn unknown_username_is_reprompted() {
        let (addr, registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut conn = Connection::connect(addr).await.unwrap();

        assert_eq!(recv(&mut conn).await, Packet::prompt("Username: "));
        conn.send_reply("mallory").await.unwrap();
        assert_eq!(
            recv(&mut conn).await,
            Packet::notice("=== Error: Invalid Username ===")
        );
        assert_eq!(recv(&mut conn).await, Packet::prompt("Username: "));
        assert!(registry.read().await.active_users().is_empty());
    }

    #[tokio::test]
    async fn successful_login_marks_user_active() {
        let (addr, registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let conn = login(addr, "alice", "secret").await;

        let guard = registry.read().await;
        assert!(guard.is_active("alice"));
        assert_eq!(guard.active_users(), ["alice".to_string()]);

        // The recorded peer address is the client's end of the connection
        let link_addr = guard.find("alice").unwrap().session().unwrap().addr;
        assert_eq!(link_addr, conn.local_addr().unwrap());
    }

    #[tokio::test]
    async fn second_login_for_active_user_is_rejected() {
        let (addr, registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let _alice = login(addr, "alice", "secret").await;

        let mut intruder = Connection::connect(addr).await.unwrap();
        assert_eq!(recv(&mut intruder).await, Packet::prompt("Username: "));
        intruder.send_reply("alice").await.unwrap();
        assert_eq!(
            recv(&mut intruder).await,
            Packet::notice("=== Error: Account already logged in. ===")
        );
        assert_eq!(recv(&mut intruder).await, Packet::prompt("Username: "));

        // Closing the rejected connection leaves the real session alone
        drop(intruder);
        sleep(Duration::from_millis(50)).await;
        assert!(registry.read().await.is_active("alice"));
    }

    #[tokio::test]
    async fn lockout_scenario() {
        let (addr, registry) =
            start_server(3, Duration::from_millis(300), LockoutPolicy::Reprompt).await;
        let mut conn = Connection::connect(addr).await.unwrap();

        assert_eq!(recv(&mut conn).await, Packet::prompt("Username: "));
        conn.send_reply("alice").await.unwrap();
        assert_eq!(recv(&mut conn).await, Packet::prompt("Password: "));

        for attempt in 1..=3 {
            conn.send_reply("wrong").await.unwrap();
            let expected = if attempt < 3 {
                "=== Error: Invalid Password ==="
            } else {
                LOCKOUT_MESSAGE
            };
            assert_eq!(recv(&mut conn).await, Packet::notice(expected));
            assert_eq!(recv(&mut conn).await, Packet::prompt("Password: "));
        }

        // Correct password during the window is still refused
        conn.send_reply("secret").await.unwrap();
        assert_eq!(recv(&mut conn).await, Packet::notice(LOCKOUT_MESSAGE));
        assert_eq!(recv(&mut conn).await, Packet::prompt("Password: "));
        assert!(!registry.read().await.is_active("alice"));

        sleep(Duration::from_millis(400)).await;

        conn.send_reply("secret").await.unwrap();
        assert_eq!(
            recv(&mut conn).await,
            Packet::notice("Welcome to the chat server, alice!")
        );
        assert!(registry.read().await.is_active("alice"));
    }

    #[tokio::test]
    async fn lockout_applies_to_new_connections() {
        let (addr, _registry) =
            start_server(1, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut first = Connection::connect(addr).await.unwrap();
        recv(&mut first).await;
        first.send_reply("bob").await.unwrap();
        recv(&mut first).await;
        first.send_reply("nope").await.unwrap();
        assert_eq!(recv(&mut first).await, Packet::notice(LOCKOUT_MESSAGE));

        let mut second = Connection::connect(addr).await.unwrap();
        assert_eq!(recv(&mut second).await, Packet::prompt("Username: "));
        second.send_reply("bob").await.unwrap();
        assert_eq!(recv(&mut second).await, Packet::notice(LOCKOUT_MESSAGE));
        assert_eq!(recv(&mut second).await, Packet::prompt("Username: "));
    }

    #[tokio::test]
    async fn disconnect_policy_closes_connection() {
        let (addr, registry) =
            start_server(2, Duration::from_secs(10), LockoutPolicy::Disconnect).await;
        let mut conn = Connection::connect(addr).await.unwrap();
        recv(&mut conn).await;
        conn.send_reply("carol").await.unwrap();
        recv(&mut conn).await;

        conn.send_reply("x").await.unwrap();
        assert_eq!(
            recv(&mut conn).await,
            Packet::notice("=== Error: Invalid Password ===")
        );
        assert_eq!(recv(&mut conn).await, Packet::prompt("Password: "));
        conn.send_reply("y").await.unwrap();

        assert_eq!(recv(&mut conn).await, Packet::notice(LOCKOUT_MESSAGE));
        assert!(matches!(
            recv(&mut conn).await,
            Packet::Disconnected { .. }
        ));
        let closed = timeout(Duration::from_secs(2), conn.recv()).await.unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
        assert!(registry.read().await.is_locked_out("carol"));
    }
}

/// SESSION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn dropped_connection_removes_user() {
        let (addr, registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let conn = login(addr, "alice", "secret").await;
        assert!(registry.read().await.is_active("alice"));

        drop(conn);
        assert!(wait_until(&registry, |r| !r.is_active("alice")).await);
        assert!(!registry.read().await.find("alice").unwrap().is_online());
    }

    #[tokio::test]
    async fn logout_ends_session_and_allows_relogin() {
        let (addr, registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut conn = login(addr, "alice", "secret").await;

        conn.send_reply("logout").await.unwrap();
        assert_eq!(recv(&mut conn).await, Packet::notice("Goodbye, alice!"));
        assert_eq!(
            recv(&mut conn).await,
            Packet::Disconnected {
                reason: "logged out".to_string()
            }
        );
        assert!(wait_until(&registry, |r| !r.is_active("alice")).await);

        let _again = login(addr, "alice", "secret").await;
        assert!(registry.read().await.is_active("alice"));
    }

    #[tokio::test]
    async fn user_stays_offline_after_disconnect_in_whoelsesince() {
        let (addr, registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut alice = login(addr, "alice", "secret").await;
        let bob = login(addr, "bob", "hunter2").await;

        drop(bob);
        assert!(wait_until(&registry, |r| !r.is_active("bob")).await);

        alice.send_reply("whoelse").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::notice("No other users are active")
        );
        alice.send_reply("whoelsesince 60").await.unwrap();
        assert_eq!(recv(&mut alice).await, Packet::notice("bob"));
    }
}

/// MESSAGING TESTS
mod messaging_tests {
    use super::*;

    #[tokio::test]
    async fn whoelse_lists_other_users_in_login_order() {
        let (addr, _registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut alice = login(addr, "alice", "secret").await;
        let _carol = login(addr, "carol", "pa55").await;
        let _bob = login(addr, "bob", "hunter2").await;

        alice.send_reply("whoelse").await.unwrap();
        assert_eq!(recv(&mut alice).await, Packet::notice("carol\nbob"));
    }

    #[tokio::test]
    async fn message_is_relayed_to_recipient() {
        let (addr, _registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut alice = login(addr, "alice", "secret").await;
        let mut bob = login(addr, "bob", "hunter2").await;

        alice.send_reply("message bob see you at noon").await.unwrap();
        assert_eq!(
            recv(&mut bob).await,
            Packet::Chat {
                from: "alice".to_string(),
                text: "see you at noon".to_string(),
                broadcast: false,
            }
        );

        alice.send_reply("message carol hi").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::notice("Error: carol is offline")
        );
    }

    #[tokio::test]
    async fn block_stops_messages_and_broadcasts() {
        let (addr, _registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut alice = login(addr, "alice", "secret").await;
        let mut bob = login(addr, "bob", "hunter2").await;
        let mut carol = login(addr, "carol", "pa55").await;

        bob.send_reply("block alice").await.unwrap();
        assert_eq!(recv(&mut bob).await, Packet::notice("alice is blocked"));

        alice.send_reply("message bob hello").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::notice("Your message could not be delivered as the recipient has blocked you")
        );

        alice.send_reply("broadcast lunch?").await.unwrap();
        assert_eq!(
            recv(&mut carol).await,
            Packet::Chat {
                from: "alice".to_string(),
                text: "lunch?".to_string(),
                broadcast: true,
            }
        );
        assert_eq!(
            recv(&mut alice).await,
            Packet::notice("Your message could not be delivered to some recipients")
        );

        // Bob only sees his own command replies
        bob.send_reply("unblock alice").await.unwrap();
        assert_eq!(recv(&mut bob).await, Packet::notice("alice is unblocked"));
    }

    #[tokio::test]
    async fn setupprivate_returns_peer_address() {
        let (addr, _registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut alice = login(addr, "alice", "secret").await;
        let bob = login(addr, "bob", "hunter2").await;

        alice.send_reply("setupprivate bob").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::PeerSession(PeerSetup::Ready {
                username: "bob".to_string(),
                addr: bob.local_addr().unwrap(),
            })
        );

        alice.send_reply("setupprivate alice").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::PeerSession(PeerSetup::SelfTarget)
        );

        alice.send_reply("setupprivate nobody").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::PeerSession(PeerSetup::Invalid)
        );
    }

    #[tokio::test]
    async fn unknown_command_gets_error_notice() {
        let (addr, _registry) = start_server(3, Duration::from_secs(10), LockoutPolicy::Reprompt).await;
        let mut alice = login(addr, "alice", "secret").await;

        alice.send_reply("dance").await.unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Packet::notice("That is not a valid command.")
        );
    }
}
