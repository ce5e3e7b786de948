//! End-to-end scenarios driving the engine through its public interface.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use weft_consensus::{
    Ballot, BallotRef, Block, BlockVote, Config, Engine, EngineError, EpochData, Mode, Votes,
};
use weft_types::{AtxHeader, AtxId, BallotId, Beacon, BlockId, EpochId, LayerId, Sign, Weight};

fn config() -> Config {
    Config {
        layers_per_epoch: 10,
        hdist: 3,
        zdist: 6,
        bad_beacon_vote_delay_layers: 2,
        global_threshold_num: 1,
        global_threshold_denom: 2,
        local_threshold_num: 1,
        local_threshold_denom: 4,
        window_size: 10_000,
        multi_support: Default::default(),
    }
}

fn good_beacon() -> Beacon {
    Beacon::new([1, 2, 3, 4])
}

fn wrong_beacon() -> Beacon {
    Beacon::new([9, 9, 9, 9])
}

fn atx_id(byte: u8) -> AtxId {
    AtxId::new([byte; 32])
}

fn ballot_id(byte: u8) -> BallotId {
    BallotId::new([byte; 32])
}

fn block_id(byte: u8) -> BlockId {
    BlockId::new([byte; 32])
}

#[derive(Clone, Debug)]
enum Event {
    Atx(AtxHeader),
    Beacon(EpochId, Beacon),
    Block(Block),
    Hare(LayerId, Option<BlockId>),
    Ballot(Ballot),
}

fn apply(engine: &mut Engine, event: &Event) -> Result<(), EngineError> {
    match event {
        Event::Atx(header) => {
            engine.on_atx(*header);
            Ok(())
        }
        Event::Beacon(epoch, beacon) => {
            engine.on_beacon(*epoch, *beacon);
            Ok(())
        }
        Event::Block(block) => engine.on_block(block),
        Event::Hare(layer, output) => {
            engine.on_hare_output(*layer, *output);
            Ok(())
        }
        Event::Ballot(ballot) => engine.on_ballot(ballot),
    }
}

/// Deliver every event, re-queueing `Missing*` refusals until they resolve.
fn deliver(engine: &mut Engine, events: Vec<Event>) {
    let mut queue: VecDeque<Event> = events.into();
    let mut deferred = 0usize;
    while let Some(event) = queue.pop_front() {
        match apply(engine, &event) {
            Ok(()) => deferred = 0,
            Err(err) if err.is_missing() => {
                deferred += 1;
                assert!(
                    deferred <= queue.len() + 1,
                    "unresolvable dependency: {err}"
                );
                queue.push_back(event);
            }
            Err(err) => panic!("unexpected rejection: {err}"),
        }
    }
}

fn build_engine(events: Vec<Event>) -> Engine {
    let mut engine = Engine::new(config());
    deliver(&mut engine, events);
    engine
}

/// An activation for epoch 1 (layers 10..19 under the test stride).
fn atx(byte: u8, weight: u64, height: u64) -> Event {
    Event::Atx(AtxHeader {
        id: atx_id(byte),
        epoch: EpochId::new(1),
        weight,
        height,
    })
}

fn vote(block: u8, layer: u32, height: u64) -> BlockVote {
    BlockVote {
        id: block_id(block),
        layer: LayerId::new(layer),
        height,
    }
}

/// A reference ballot for epoch 1 with explicit support votes only.
fn ballot(
    id: u8,
    layer: u32,
    atx: u8,
    beacon: Beacon,
    slots: u32,
    support: Vec<BlockVote>,
) -> Event {
    Event::Ballot(Ballot {
        id: ballot_id(id),
        layer: LayerId::new(layer),
        atx: atx_id(atx),
        reference: BallotRef::Data(EpochData {
            beacon,
            eligibility_slots: slots,
        }),
        votes: Votes {
            base: None,
            support,
            against: Vec::new(),
            abstain: Vec::new(),
        },
        eligibilities: 1,
    })
}

fn block(id: u8, layer: u32, height: u64) -> Event {
    Event::Block(Block {
        id: block_id(id),
        layer: LayerId::new(layer),
        height,
        txs: Vec::new(),
    })
}

/// Hare decided "empty" for every layer in `range`.
fn empty_hares(range: std::ops::RangeInclusive<u32>) -> Vec<Event> {
    range.map(|l| Event::Hare(LayerId::new(l), None)).collect()
}

// ── Scenario 1: unanimous support verifies in verifying mode ─────────────

fn unanimous_events() -> Vec<Event> {
    let mut events = vec![
        atx(1, 10, 10),
        atx(2, 10, 10),
        atx(3, 10, 10),
        Event::Beacon(EpochId::new(1), good_beacon()),
    ];
    events.extend(empty_hares(1..=9));
    events.push(block(1, 10, 5));
    events.push(Event::Hare(LayerId::new(10), Some(block_id(1))));
    for (id, atx) in [(11u8, 1u8), (12, 2), (13, 3)] {
        events.push(ballot(id, 11, atx, good_beacon(), 1, vec![vote(1, 10, 5)]));
    }
    events
}

#[test]
fn unanimous_support_verifies_in_verifying_mode() {
    let mut engine = build_engine(unanimous_events());
    let report = engine.advance();

    assert_eq!(engine.verified(), LayerId::new(10));
    assert_eq!(engine.validity(&block_id(1)), Sign::Support);
    assert_eq!(report.mode, Mode::Verifying);
    assert!(report
        .newly_verified
        .contains(&(LayerId::new(10), Some(block_id(1)))));
    // empty layers below decided as empty
    assert!(report.newly_verified.contains(&(LayerId::new(5), None)));
}

// ── Scenario 2: split vote stalls, then self-heals ───────────────────────

fn split_events() -> Vec<Event> {
    let mut events = vec![
        atx(1, 10, 10),
        atx(2, 10, 10),
        Event::Beacon(EpochId::new(1), good_beacon()),
    ];
    events.extend(empty_hares(1..=9));
    events.push(block(1, 10, 5));
    events.push(block(2, 10, 5));
    events.push(Event::Hare(LayerId::new(10), Some(block_id(1))));
    for layer in 11..=17u32 {
        let byte = (layer * 2) as u8;
        events.push(ballot(byte, layer, 1, good_beacon(), 1, vec![vote(1, 10, 5)]));
        events.push(ballot(
            byte + 1,
            layer,
            2,
            good_beacon(),
            1,
            vec![vote(2, 10, 5)],
        ));
    }
    events
}

#[test]
fn split_vote_stalls_then_self_heals() {
    let mut engine = build_engine(split_events());
    let report = engine.advance();

    // margins are tied at zero; healing breaks the tie by lower id
    assert_eq!(engine.verified(), LayerId::new(10));
    assert_eq!(engine.validity(&block_id(1)), Sign::Support);
    assert_eq!(engine.validity(&block_id(2)), Sign::Against);
    assert_eq!(report.mode, Mode::Healing);
    assert_eq!(engine.block_margin(&block_id(1)), Some(Weight::ZERO));
    assert_eq!(engine.block_margin(&block_id(2)), Some(Weight::ZERO));
}

#[test]
fn split_vote_does_not_heal_before_zdist() {
    // same split, but hare never terminated on layer 10 and inputs only
    // reach layer 15: 15 - 10 is past hdist yet not past zdist
    let events: Vec<Event> = split_events()
        .into_iter()
        .filter(|event| match event {
            Event::Ballot(b) => b.layer <= LayerId::new(15),
            Event::Hare(layer, _) => *layer != LayerId::new(10),
            _ => true,
        })
        .collect();
    let mut engine = build_engine(events);
    let report = engine.advance();

    assert_eq!(engine.verified(), LayerId::new(9));
    assert!(report.undecided.contains(&LayerId::new(10)));
    assert_eq!(engine.validity(&block_id(1)), Sign::Neutral);
    assert_eq!(engine.validity(&block_id(2)), Sign::Neutral);
}

// ── Scenario 3: bad-beacon votes are delayed ─────────────────────────────

fn bad_beacon_events() -> Vec<Event> {
    let mut events = vec![
        atx(1, 10, 10),
        atx(2, 10, 10),
        atx(3, 10, 10),
        Event::Beacon(EpochId::new(1), good_beacon()),
    ];
    events.extend(empty_hares(1..=9));
    events.push(block(1, 10, 5));
    events.push(Event::Hare(LayerId::new(10), Some(block_id(1))));
    events.push(ballot(11, 11, 1, good_beacon(), 1, vec![vote(1, 10, 5)]));
    events.push(ballot(12, 11, 2, good_beacon(), 1, vec![vote(1, 10, 5)]));
    // same vote, wrong beacon
    events.push(ballot(13, 11, 3, wrong_beacon(), 1, vec![vote(1, 10, 5)]));
    events
}

#[test]
fn bad_beacon_vote_lands_only_after_the_delay() {
    let mut engine = build_engine(bad_beacon_events());
    engine.advance();

    // only the two good ballots are in the margin
    assert_eq!(engine.block_margin(&block_id(1)), Some(Weight::from_units(20)));
    assert_eq!(engine.verified(), LayerId::new(10));

    // a block two layers later makes the bad-beacon ballot old enough
    let mut engine2 = build_engine(bad_beacon_events());
    deliver(&mut engine2, vec![block(9, 13, 5)]);
    engine2.advance();
    assert_eq!(
        engine2.block_margin(&block_id(1)),
        Some(Weight::from_units(30))
    );
}

// ── Scenario 4: a neutral block between supports blocks verification ─────

fn sandwich_events() -> Vec<Event> {
    let mut events = vec![
        atx(1, 50, 20),
        atx(2, 50, 20),
        atx(3, 50, 20),
        atx(4, 50, 20),
        Event::Beacon(EpochId::new(1), good_beacon()),
    ];
    events.extend(empty_hares(1..=9));
    events.push(block(1, 10, 5));
    events.push(block(2, 10, 10));
    events.push(block(3, 10, 15));
    events.push(Event::Hare(LayerId::new(10), Some(block_id(1))));
    // 4 ballots per layer 11..=14, weight 5 each (50 / 10 slots). Three of
    // them support all blocks, the fourth leaves the middle block out, so
    // its margin lands exactly on the threshold: neutral.
    for layer in 11..=14u32 {
        let base_byte = ((layer - 11) * 4 + 20) as u8;
        for voter in 0..4u8 {
            let support = if voter < 3 {
                vec![vote(1, 10, 5), vote(2, 10, 10), vote(3, 10, 15)]
            } else {
                vec![vote(1, 10, 5), vote(3, 10, 15)]
            };
            events.push(ballot(
                base_byte + voter,
                layer,
                voter + 1,
                good_beacon(),
                10,
                support,
            ));
        }
    }
    events
}

#[test]
fn neutral_block_between_supports_blocks_verification() {
    let mut engine = build_engine(sandwich_events());
    let report = engine.advance();

    assert_eq!(engine.verified(), LayerId::new(9));
    assert!(report.undecided.contains(&LayerId::new(10)));
    // no validity is written for an unverified layer
    assert_eq!(engine.validity(&block_id(1)), Sign::Neutral);
    assert_eq!(engine.validity(&block_id(2)), Sign::Neutral);
    assert_eq!(engine.validity(&block_id(3)), Sign::Neutral);
    // the middle block's margin sits exactly on the threshold
    assert_eq!(engine.block_margin(&block_id(2)), Some(Weight::from_units(40)));
}

// ── Scenario 5: an empty layer verifies ──────────────────────────────────

fn empty_layer_events() -> Vec<Event> {
    let mut events = vec![
        atx(1, 10, 10),
        atx(2, 10, 10),
        atx(3, 10, 10),
        Event::Beacon(EpochId::new(1), good_beacon()),
    ];
    events.extend(empty_hares(1..=10));
    events.push(ballot(11, 11, 1, good_beacon(), 1, vec![]));
    events.push(ballot(12, 12, 2, good_beacon(), 1, vec![]));
    events.push(ballot(13, 13, 3, good_beacon(), 1, vec![]));
    events
}

#[test]
fn empty_layer_verifies_as_empty() {
    let mut engine = build_engine(empty_layer_events());
    let report = engine.advance();

    assert_eq!(engine.verified(), LayerId::new(10));
    assert!(report.newly_verified.contains(&(LayerId::new(10), None)));
    assert_eq!(report.mode, Mode::Verifying);
}

// ── Scenario 6: height cutoff ────────────────────────────────────────────

fn height_cutoff_events() -> Vec<Event> {
    let mut events = vec![
        atx(1, 10, 100),
        atx(2, 10, 100),
        atx(3, 10, 100),
        Event::Beacon(EpochId::new(1), good_beacon()),
    ];
    events.extend(empty_hares(1..=9));
    // far above the epoch reference height of 100
    events.push(block(1, 10, 1_000_000));
    events.push(Event::Hare(LayerId::new(10), Some(block_id(1))));
    for (id, atx) in [(11u8, 1u8), (12, 2), (13, 3)] {
        events.push(ballot(
            id,
            11,
            atx,
            good_beacon(),
            1,
            vec![vote(1, 10, 1_000_000)],
        ));
    }
    events
}

#[test]
fn too_high_block_decides_neutral_despite_support() {
    let mut engine = build_engine(height_cutoff_events());
    let report = engine.advance();

    assert_eq!(engine.verified(), LayerId::new(9));
    assert!(report.undecided.contains(&LayerId::new(10)));
    assert_eq!(engine.validity(&block_id(1)), Sign::Neutral);
    // all the support weight is there, it just cannot count
    assert_eq!(engine.block_margin(&block_id(1)), Some(Weight::from_units(30)));
}

#[test]
fn height_cutoff_layer_recovers_through_healing() {
    let mut engine = build_engine(height_cutoff_events());
    engine.advance();
    assert_eq!(engine.verified(), LayerId::new(9));

    // age the layer past zdist; healing ignores the cutoff
    let fillers: Vec<Event> = (14..=17u32).map(|l| block(l as u8 + 40, l, 5)).collect();
    deliver(&mut engine, fillers);
    let report = engine.advance();

    assert_eq!(engine.verified(), LayerId::new(10));
    assert_eq!(engine.validity(&block_id(1)), Sign::Support);
    assert_eq!(report.mode, Mode::Healing);
}

// ── Cross-cutting properties ─────────────────────────────────────────────

fn outcome(engine: &Engine, blocks: &[u8]) -> (LayerId, Vec<Sign>, Option<weft_consensus::OpinionHash>) {
    (
        engine.verified(),
        blocks.iter().map(|b| engine.validity(&block_id(*b))).collect(),
        engine.opinion(engine.verified()),
    )
}

#[test]
fn delivery_order_does_not_change_the_outcome() {
    for (events, blocks) in [
        (unanimous_events(), vec![1u8]),
        (bad_beacon_events(), vec![1u8]),
        (split_events(), vec![1u8, 2]),
    ] {
        let mut baseline = build_engine(events.clone());
        baseline.advance();
        let expected = outcome(&baseline, &blocks);

        for seed in 0..6u64 {
            let mut shuffled = events.clone();
            shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
            let mut engine = build_engine(shuffled);
            engine.advance();
            assert_eq!(outcome(&engine, &blocks), expected, "seed {seed}");
        }
    }
}

#[test]
fn interleaved_advances_do_not_change_the_outcome() {
    let events = unanimous_events();
    let mut baseline = build_engine(events.clone());
    baseline.advance();
    let expected = outcome(&baseline, &[1u8]);

    let mut engine = Engine::new(config());
    for event in events {
        deliver(&mut engine, vec![event]);
        engine.advance();
    }
    assert_eq!(outcome(&engine, &[1u8]), expected);
}

#[test]
fn verified_is_monotone_under_interleaved_advances() {
    let mut shuffled = split_events();
    shuffled.shuffle(&mut StdRng::seed_from_u64(42));

    let mut engine = Engine::new(config());
    let mut queue: VecDeque<Event> = shuffled.into();
    let mut watermark = engine.verified();
    while let Some(event) = queue.pop_front() {
        if apply(&mut engine, &event).is_err() {
            queue.push_back(event);
        }
        engine.advance();
        assert!(engine.verified() >= watermark);
        watermark = engine.verified();
    }
}

#[test]
fn encoded_votes_round_trip_into_an_identical_engine() {
    let mut events = unanimous_events();
    events.push(block(9, 13, 5)); // pushes `last` to 13
    let mut first = build_engine(events.clone());
    first.advance();

    let votes = first.encode_votes(None);
    assert!(votes.base.is_some());

    // apply the encoded opinion as a new ballot in a second engine that
    // saw the same inputs
    let mut second = build_engine(events);
    second.advance();
    let encoded = Ballot {
        id: ballot_id(99),
        layer: second.last(),
        atx: atx_id(1),
        reference: BallotRef::Ballot(votes.base.unwrap()),
        votes,
        eligibilities: 1,
    };
    second.on_ballot(&encoded).unwrap();

    let voted_through = second.last().prev().unwrap();
    assert_eq!(
        second.ballot_opinion(&ballot_id(99)),
        second.opinion(voted_through)
    );
}

#[test]
fn snapshot_round_trip_preserves_decisions() {
    let mut engine = build_engine(unanimous_events());
    engine.advance();

    let snapshot = engine.snapshot();
    let bytes = bincode::serialize(&snapshot).unwrap();
    let decoded = bincode::deserialize(&bytes).unwrap();
    let restored = Engine::restore(config(), &decoded);

    assert_eq!(restored.verified(), LayerId::new(10));
    assert_eq!(restored.validity(&block_id(1)), Sign::Support);
    assert_eq!(
        restored.opinion(LayerId::new(10)),
        engine.opinion(LayerId::new(10))
    );
}

#[test]
fn weight_is_conserved_within_a_layer() {
    let mut engine = build_engine(split_events());
    engine.advance();

    // 14 counted ballots of weight 10 voting on layer 10, last = 17
    let margins = engine.block_margin(&block_id(1)).unwrap().abs();
    let margins = margins.saturating_add(engine.block_margin(&block_id(2)).unwrap().abs());
    let turnout = margins.saturating_add(engine.empty_weight(LayerId::new(10)).unwrap().abs());
    let bound = Weight::from_units(10 * 14)
        .checked_mul_units((engine.last().since(LayerId::new(10))) as u64)
        .unwrap();
    assert!(turnout <= bound);
}

#[test]
fn eviction_drops_history_but_keeps_decisions_above() {
    let mut engine = build_engine(unanimous_events());
    engine.advance();
    assert_eq!(engine.verified(), LayerId::new(10));

    engine.evict(LayerId::new(8)).unwrap();
    assert_eq!(engine.evicted(), LayerId::new(7));
    // history below the boundary is gone, the decision above survives
    assert_eq!(engine.validity(&block_id(1)), Sign::Support);
    assert!(engine.opinion(LayerId::new(5)).is_none());

    // stale re-delivery is refused
    let err = engine
        .on_block(&Block {
            id: block_id(50),
            layer: LayerId::new(5),
            height: 0,
            txs: Vec::new(),
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::Stale { .. }));
}
