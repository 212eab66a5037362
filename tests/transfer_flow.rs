//! End-to-end escrow flows: initiate, accept, reject, and the races a
//! second responder can lose.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use sendchat::chat::{ConversationRegistry, MessageStore};
use sendchat::directory::UserDirectory;
use sendchat::ledger::LedgerStore;
use sendchat::transfer::{TransferAction, TransferEngine, TransferStatus};

struct World {
    ledger: Arc<LedgerStore>,
    engine: Arc<TransferEngine>,
    sender: Uuid,
    receiver: Uuid,
    conversation: Uuid,
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn world() -> World {
    let directory = Arc::new(UserDirectory::new());
    let registry = Arc::new(ConversationRegistry::new(Arc::clone(&directory)));
    let ledger = Arc::new(LedgerStore::new());
    let messages = Arc::new(MessageStore::new(
        Arc::clone(&registry),
        Arc::clone(&directory),
    ));
    let engine = Arc::new(TransferEngine::new(
        Arc::clone(&directory),
        Arc::clone(&ledger),
        messages,
    ));

    let sender = directory.register("ada").id;
    let receiver = directory.register("bob").id;
    ledger.open_account("1000000001", dec("1000.00")).unwrap();
    ledger.open_account("1000000002", dec("0.00")).unwrap();
    directory.link_wallet(sender, "1000000001").unwrap();
    directory.link_wallet(receiver, "1000000002").unwrap();
    let conversation = registry.create_or_get_direct(sender, receiver).unwrap().id;

    World {
        ledger,
        engine,
        sender,
        receiver,
        conversation,
    }
}

#[test]
fn accept_moves_amount_exactly_once() {
    let w = world();

    let (message, record) = w
        .engine
        .initiate(w.conversation, w.sender, dec("200"), None)
        .unwrap();
    assert_eq!(record.status, TransferStatus::Pending);

    let sender = w.ledger.balances("1000000001").unwrap();
    assert_eq!(sender.available, dec("800.00"));
    assert_eq!(sender.held, dec("200.00"));

    let resolution = w
        .engine
        .respond(message.id, w.receiver, TransferAction::Accept)
        .unwrap();
    assert_eq!(resolution.status, TransferStatus::Completed);
    assert_eq!(resolution.transfer_id, record.id);

    let sender = w.ledger.balances("1000000001").unwrap();
    let receiver = w.ledger.balances("1000000002").unwrap();
    assert_eq!(sender.available, dec("800.00"));
    assert_eq!(sender.held, dec("0.00"));
    assert_eq!(receiver.available, dec("200.00"));

    // Terminal state: a later reject fails and balances are unchanged
    let err = w
        .engine
        .respond(message.id, w.receiver, TransferAction::Reject)
        .unwrap_err();
    assert_eq!(err.kind(), "already_finalized");
    assert_eq!(
        w.ledger.balances("1000000001").unwrap().available,
        dec("800.00")
    );
    assert_eq!(
        w.ledger.balances("1000000002").unwrap().available,
        dec("200.00")
    );
}

#[test]
fn reject_restores_sender_to_pre_initiate_balance() {
    let w = world();
    let before = w.ledger.balances("1000000001").unwrap();

    let (message, _) = w
        .engine
        .initiate(w.conversation, w.sender, dec("123.45"), Some("rent".into()))
        .unwrap();
    let resolution = w
        .engine
        .respond(message.id, w.receiver, TransferAction::Reject)
        .unwrap();
    assert_eq!(resolution.status, TransferStatus::Rejected);

    assert_eq!(w.ledger.balances("1000000001").unwrap(), before);
    assert_eq!(
        w.ledger.balances("1000000002").unwrap().available,
        dec("0.00")
    );
}

#[test]
fn double_respond_is_rejected_in_every_combination() {
    let w = world();

    for (first, second) in [
        (TransferAction::Accept, TransferAction::Accept),
        (TransferAction::Accept, TransferAction::Reject),
        (TransferAction::Reject, TransferAction::Reject),
    ] {
        let (message, _) = w
            .engine
            .initiate(w.conversation, w.sender, dec("10"), None)
            .unwrap();
        w.engine.respond(message.id, w.receiver, first).unwrap();
        let before_sender = w.ledger.balances("1000000001").unwrap();
        let before_receiver = w.ledger.balances("1000000002").unwrap();

        let err = w
            .engine
            .respond(message.id, w.receiver, second)
            .unwrap_err();
        assert_eq!(err.kind(), "already_finalized");
        assert_eq!(w.ledger.balances("1000000001").unwrap(), before_sender);
        assert_eq!(w.ledger.balances("1000000002").unwrap(), before_receiver);
    }
}

#[test]
fn concurrent_responses_settle_exactly_once() {
    let w = world();
    let (message, _) = w
        .engine
        .initiate(w.conversation, w.sender, dec("500"), None)
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&w.engine);
        let receiver = w.receiver;
        let message_id = message.id;
        handles.push(std::thread::spawn(move || {
            engine.respond(message_id, receiver, TransferAction::Accept)
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_eq!(
            result.as_ref().unwrap_err().kind(),
            "already_finalized"
        );
    }

    // The amount moved once, not four times
    assert_eq!(
        w.ledger.balances("1000000002").unwrap().available,
        dec("500.00")
    );
    assert_eq!(w.ledger.balances("1000000001").unwrap().held, dec("0.00"));
}

#[test]
fn only_the_receiver_may_respond() {
    let w = world();
    let (message, _) = w
        .engine
        .initiate(w.conversation, w.sender, dec("50"), None)
        .unwrap();

    let err = w
        .engine
        .respond(message.id, w.sender, TransferAction::Accept)
        .unwrap_err();
    assert_eq!(err.kind(), "access_denied");

    // No ledger movement happened
    assert_eq!(w.ledger.balances("1000000001").unwrap().held, dec("50.00"));
}

#[test]
fn conservation_holds_across_a_busy_session() {
    let w = world();
    let total = |l: &LedgerStore| {
        let a = l.balances("1000000001").unwrap();
        let b = l.balances("1000000002").unwrap();
        a.available + a.held + b.available + b.held
    };
    let before = total(&w.ledger);

    for i in 0..10 {
        let (message, _) = w
            .engine
            .initiate(w.conversation, w.sender, dec("25.00"), None)
            .unwrap();
        let action = if i % 2 == 0 {
            TransferAction::Accept
        } else {
            TransferAction::Reject
        };
        w.engine.respond(message.id, w.receiver, action).unwrap();
    }

    assert_eq!(total(&w.ledger), before);
    // Five accepts of 25.00 each
    assert_eq!(
        w.ledger.balances("1000000002").unwrap().available,
        dec("125.00")
    );
}
