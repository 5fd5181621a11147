use std::sync::Mutex;

use super::*;

fn recording_observer(
    cell: &BroadcastCell<Vec<u32>>,
) -> (SubscriptionId, Arc<Mutex<Vec<Vec<u32>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = cell.subscribe(move |snapshot: &Vec<u32>| {
        sink.lock().expect("seen").push(snapshot.clone());
    });
    (id, seen)
}

#[test]
fn late_subscriber_receives_only_latest_snapshot() {
    let cell = BroadcastCell::new("cart", Vec::<u32>::new());
    cell.replace(vec![1]);
    cell.replace(vec![1, 2]);

    let (_, seen) = recording_observer(&cell);
    assert_eq!(*seen.lock().expect("seen"), vec![vec![1, 2]]);
}

#[test]
fn replace_notifies_synchronously_in_subscription_order() {
    let cell = BroadcastCell::new("cart", Vec::<u32>::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        cell.subscribe(move |snapshot: &Vec<u32>| {
            if !snapshot.is_empty() {
                order.lock().expect("order").push(label);
            }
        });
    }

    cell.replace(vec![9]);
    assert_eq!(
        *order.lock().expect("order"),
        vec!["first", "second", "third"]
    );
    assert_eq!(*cell.current(), vec![9]);
    assert_eq!(cell.version(), 1);
}

#[test]
fn unsubscribed_observer_stops_receiving() {
    let cell = BroadcastCell::new("cart", Vec::<u32>::new());
    let (id, seen) = recording_observer(&cell);
    cell.replace(vec![1]);
    assert!(cell.unsubscribe(id));
    assert!(!cell.unsubscribe(id));
    cell.replace(vec![2]);
    assert_eq!(*seen.lock().expect("seen"), vec![vec![], vec![1]]);
    assert_eq!(cell.subscriber_count(), 0);
}

#[test]
fn observer_may_read_the_cell_it_observes() {
    let cell = Arc::new(BroadcastCell::new("cart", 0_u32));
    let reader = Arc::clone(&cell);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cell.subscribe(move |value: &u32| {
        sink.lock().expect("seen").push((*value, *reader.current()));
    });
    cell.replace(5);
    assert_eq!(*seen.lock().expect("seen"), vec![(0, 0), (5, 5)]);
}

#[test]
fn update_applies_against_latest_snapshot() {
    let cell = BroadcastCell::new("cart", vec![1_u32]);
    let (_, seen) = recording_observer(&cell);
    let next = cell.update(|current| {
        let mut next = current.clone();
        next.push(2);
        next
    });
    assert_eq!(*next, vec![1, 2]);
    assert_eq!(seen.lock().expect("seen").last(), Some(&vec![1, 2]));
}

#[test]
fn derived_cell_tracks_source_until_dropped() {
    let source = BroadcastCell::new("cart", vec![2_u32, 3]);
    let badge = Arc::new(BroadcastCell::new("badge", 0_u32));
    bind_derived(&source, &badge, |items: &Vec<u32>| items.iter().sum());
    assert_eq!(*badge.current(), 5);

    source.replace(vec![4]);
    assert_eq!(*badge.current(), 4);

    drop(badge);
    source.replace(vec![1]);
}
