use boulderdash_core::{
    cell_hash, reward, Action, ButterflyExplosionVersion, GameParameters, GameState,
    HiddenCellType,
};
use rayon::prelude::*;
use std::collections::HashSet;

/// 14x14 rooms-and-keys board used by the original speed harness.
const KEYED_ROOMS_14X14: &str = "14|14|1|18|18|18|18|18|18|18|18|18|18|18|18|18|18|18|07|01|01|18|01|01|01|01|18|02|02|05|18|18|02|01|01|18|02|02|02|02|18|02|32|01|18|18|01|01|02|36|02|02|02|01|18|01|01|02|18|18|18|18|18|18|01|01|01|01|18|34|18|18|18|18|01|02|02|01|01|02|02|02|01|02|02|02|18|18|02|02|02|35|02|01|02|02|02|02|01|01|18|18|01|01|02|02|01|02|02|01|02|02|01|01|18|18|02|02|02|01|02|01|01|02|01|01|02|02|18|18|18|18|18|18|00|02|01|01|18|18|18|18|18|18|01|01|29|18|02|01|02|02|18|02|01|02|18|18|02|01|02|18|02|01|02|02|18|02|02|01|18|18|01|01|01|31|01|01|02|01|28|01|38|02|18|18|18|18|18|18|18|18|18|18|18|18|18|18|18";

fn recomputed_hash(state: &GameState) -> u64 {
    let flat_size = state.rows() * state.cols();
    (0..flat_size).fold(0, |acc, i| {
        acc ^ cell_hash(flat_size, state.hidden_item(i).expect("cell"), i)
    })
}

fn gravity_params() -> GameParameters {
    GameParameters {
        gravity: true,
        ..GameParameters::default()
    }
}

#[test]
fn identical_runs_share_hash_and_reward_trajectories() {
    let mut state_a = GameState::from_level(KEYED_ROOMS_14X14).expect("state_a");
    let mut state_b = GameState::from_level(KEYED_ROOMS_14X14).expect("state_b");

    for step in 0..60 {
        let action = Action::ALL[step % Action::ALL.len()];
        state_a.apply_action(action);
        state_b.apply_action(action);
        assert_eq!(state_a.hash(), state_b.hash(), "diverged at step {step}");
        assert_eq!(state_a.reward_signal(), state_b.reward_signal());
    }
    assert_eq!(state_a, state_b);
}

#[test]
fn incremental_hash_matches_recomputation_over_rollout() {
    let mut state = GameState::new(KEYED_ROOMS_14X14, &gravity_params()).expect("state");
    assert_eq!(state.hash(), recomputed_hash(&state));

    for step in 0..80 {
        state.apply_action(Action::ALL[(step * 7 + 3) % Action::ALL.len()]);
        assert_eq!(
            state.hash(),
            recomputed_hash(&state),
            "hash drifted at step {step}"
        );
    }
}

#[test]
fn gems_collected_is_monotone() {
    let mut state = GameState::new(KEYED_ROOMS_14X14, &gravity_params()).expect("state");
    let mut previous = state.gems_collected();
    for step in 0..120 {
        state.apply_action(Action::ALL[step % Action::ALL.len()]);
        assert!(state.gems_collected() >= previous);
        previous = state.gems_collected();
    }
}

#[test]
fn trivial_move_lands_agent_on_empty_cell() {
    let mut state = GameState::from_level("3|3|0|1|1|1|1|0|1|1|1|1").expect("state");
    state.apply_action(Action::Right);
    assert_eq!(state.agent_index(), 5);
    assert_eq!(state.index_to_position(5), Ok((1, 2)));
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::Empty));
    assert_eq!(state.reward_signal(), 0);
}

#[test]
fn diamond_pickup_counts_gem_and_sets_signal() {
    let mut state = GameState::from_level("3|3|1|1|1|1|1|0|5|1|1|1").expect("state");
    state.apply_action(Action::Right);
    assert_eq!(state.agent_index(), 5);
    assert_eq!(state.gems_collected(), 1);
    assert_ne!(state.reward_signal() & reward::COLLECT_DIAMOND, 0);
}

#[test]
fn exit_opens_after_quota_and_admits_agent() {
    // Exit above the agent, diamond to the right, one gem required.
    let mut state = GameState::from_level("3|3|1|1|7|1|1|0|5|1|1|1").expect("state");

    state.apply_action(Action::Right);
    assert_eq!(state.gems_collected(), 1);
    assert_eq!(state.hidden_item(1), Ok(HiddenCellType::ExitOpen));
    assert!(!state.is_terminal());

    state.apply_action(Action::Left);
    assert_eq!(state.agent_index(), 4);

    state.apply_action(Action::Up);
    assert!(state.agent_in_exit());
    assert!(state.is_solution());
    assert!(state.is_terminal());
    assert_eq!(state.hidden_item(1), Ok(HiddenCellType::AgentInExit));
    assert_ne!(state.reward_signal() & reward::WALK_THROUGH_EXIT, 0);
}

#[test]
fn falling_stone_descends_one_cell_per_tick_then_kills_agent() {
    let mut state = GameState::new("3|3|0|1|3|1|1|1|1|1|0|1", &gravity_params()).expect("state");

    state.apply_action(Action::Down); // blocked: agent is on the bottom row
    assert_eq!(state.hidden_item(1), Ok(HiddenCellType::Empty));
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::StoneFalling));
    assert!(state.agent_alive());

    state.apply_action(Action::Down);
    assert!(!state.agent_alive());
    assert!(state.is_terminal());
    assert!(!state.is_solution());
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::ExplosionEmpty));

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::Empty));
}

#[test]
fn stone_drop_detonates_adjacent_bomb_chain() {
    // Stone over the left bomb; the blast consumes the right bomb and the
    // surrounding dirt in the same cascade.
    let level = "4|4|0|1|3|1|0|2|1|2|1|2|41|41|2|2|2|2|2";
    let mut state = GameState::new(level, &gravity_params()).expect("state");

    state.apply_action(Action::Up); // blocked: agent is on the top row
    assert_eq!(state.hidden_item(5), Ok(HiddenCellType::StoneFalling));

    state.apply_action(Action::Up);
    assert_eq!(state.hidden_item(9), Ok(HiddenCellType::ExplosionEmpty));
    assert_eq!(state.hidden_item(10), Ok(HiddenCellType::ExplosionEmpty));
    assert!(state.agent_alive());

    state.apply_action(Action::Up);
    for index in [5usize, 6, 7, 9, 10, 11, 13, 14, 15] {
        assert_eq!(
            state.hidden_item(index),
            Ok(HiddenCellType::Empty),
            "cell {index} should be cleared"
        );
    }
    assert_eq!(state.hash(), recomputed_hash(&state));
}

#[test]
fn oversized_blob_is_petrified() {
    // 5x5 of dirt with a blob seed; 16% of 25 cells caps the blob at 4.
    let mut cells: Vec<&str> = vec!["2"; 25];
    cells[0] = "0";
    cells[12] = "23";
    let level = format!("5|5|0|{}", cells.join("|"));
    let params = GameParameters {
        blob_chance: 255,
        ..GameParameters::default()
    };
    let mut state = GameState::new(&level, &params).expect("state");

    let mut petrified = false;
    for _ in 0..300 {
        state.apply_action(Action::Up); // blocked: agent is in the corner
        let blobs = state.indices(HiddenCellType::Blob).len();
        let stones = state.indices(HiddenCellType::Stone).len();
        if blobs == 0 && stones > 0 {
            petrified = true;
            assert!(stones > 4, "expected the blob to overshoot its cap");
            break;
        }
    }
    assert!(petrified, "blob never converted to stone");
    assert!(state.indices(HiddenCellType::Diamond).is_empty());
}

#[test]
fn magic_wall_turns_falling_stone_into_diamond() {
    // Stone falls one cell, passes the dormant wall, emerges as a diamond.
    let level = "5|3|0|1|3|1|1|1|1|1|20|1|1|1|1|0|1|2";
    let mut state = GameState::new(level, &gravity_params()).expect("state");

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::StoneFalling));

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::Empty));
    assert_eq!(state.hidden_item(10), Ok(HiddenCellType::DiamondFalling));
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::WallMagicOn));

    state.apply_action(Action::Down);
    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(13), Ok(HiddenCellType::Diamond));
}

#[test]
fn expired_magic_wall_leaves_stone_in_place() {
    // The stone is already falling right above a wall whose budget is spent.
    let level = "4|3|0|1|1|1|1|4|1|1|20|1|0|1|2";
    let params = GameParameters {
        gravity: true,
        magic_wall_steps: 0,
        ..GameParameters::default()
    };
    let mut state = GameState::new(level, &params).expect("state");

    // The wall is out of budget: the stone is not consumed, and the wall
    // reports itself expired on the same scan.
    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::StoneFalling));
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::WallMagicExpired));

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::Stone));
}

#[test]
fn stone_crushes_butterfly_into_diamond_under_convert_rules() {
    let level = "5|3|0|1|3|1|2|1|2|2|14|2|2|2|2|0|2|2";
    let params = GameParameters {
        gravity: true,
        butterfly_explosion_ver: ButterflyExplosionVersion::Convert,
        ..GameParameters::default()
    };
    let mut state = GameState::new(level, &params).expect("state");

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::StoneFalling));

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::Empty));
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::Diamond));
    assert_ne!(state.reward_signal() & reward::BUTTERFLY_TO_DIAMOND, 0);
}

#[test]
fn stone_explodes_butterfly_into_diamond_shower_by_default() {
    let level = "5|3|0|1|3|1|2|1|2|2|14|2|2|2|2|0|2|2";
    let mut state = GameState::new(level, &gravity_params()).expect("state");

    state.apply_action(Action::Down);
    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::ExplosionDiamond));

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::Diamond));
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::Diamond));
    assert_ne!(state.reward_signal() & reward::BUTTERFLY_TO_DIAMOND, 0);
    assert!(state.agent_alive());
}

#[test]
fn stone_cracks_nut_and_agent_collects_the_diamond() {
    let level = "4|3|0|1|3|1|1|1|1|1|39|1|2|0|2";
    let mut state = GameState::new(level, &gravity_params()).expect("state");

    state.apply_action(Action::Down);
    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(7), Ok(HiddenCellType::Diamond));
    assert_ne!(state.reward_signal() & reward::NUT_TO_DIAMOND, 0);

    state.apply_action(Action::Up);
    assert_eq!(state.gems_collected(), 1);
    assert_ne!(state.reward_signal() & reward::COLLECT_DIAMOND, 0);
}

#[test]
fn orange_marches_into_agent_and_detonates() {
    let level = "3|3|0|19|19|19|46|1|1|19|19|0";
    let mut state = GameState::from_level(level).expect("state");

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::OrangeRight));

    state.apply_action(Action::Down);
    assert_eq!(state.hidden_item(5), Ok(HiddenCellType::OrangeRight));

    state.apply_action(Action::Down);
    assert!(!state.agent_alive());
    assert!(state.is_terminal());
}

#[test]
fn cornered_orange_rerolls_its_heading() {
    let level = "3|3|0|19|1|19|1|46|19|19|1|0";
    let mut state = GameState::from_level(level).expect("state");
    state.apply_action(Action::Up);
    let rerouted = state.hidden_item(4).expect("cell");
    assert!(matches!(
        rerouted,
        HiddenCellType::OrangeUp | HiddenCellType::OrangeDown | HiddenCellType::OrangeLeft
    ));
}

#[test]
fn firefly_next_to_agent_explodes() {
    let level = "3|3|0|19|10|19|19|0|19|19|19|19";
    let mut state = GameState::from_level(level).expect("state");
    state.apply_action(Action::Down);
    assert!(!state.agent_alive());
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::ExplosionEmpty));
    assert_eq!(state.hash(), recomputed_hash(&state));
}

#[test]
fn blocked_agent_action_still_advances_the_world() {
    // Agent sealed in a steel cell; a firefly roams a separate pocket.
    let level = "5|5|0|19|19|19|19|19|19|0|19|1|19|19|19|19|1|19|19|1|1|10|19|19|19|19|19|19";
    let mut state = GameState::from_level(level).expect("state");
    state.apply_action(Action::Up);
    assert_eq!(state.agent_index(), 6);
    assert_eq!(state.hidden_item(18), Ok(HiddenCellType::Empty));
    assert_eq!(state.hidden_item(17), Ok(HiddenCellType::FireflyLeft));
}

#[test]
fn agent_walks_through_open_gate() {
    let mut state = GameState::from_level("3|3|0|19|19|19|0|28|1|19|19|19").expect("state");
    state.apply_action(Action::Right);
    assert_eq!(state.agent_index(), 5);
    assert_eq!(state.hidden_item(4), Ok(HiddenCellType::GateRedOpen));
    assert_eq!(state.hidden_item(3), Ok(HiddenCellType::Empty));
    let signal = state.reward_signal();
    assert_ne!(signal & reward::WALK_THROUGH_GATE, 0);
    assert_ne!(signal & reward::WALK_THROUGH_GATE_RED, 0);
}

#[test]
fn gate_walkthrough_collects_what_lies_beyond() {
    let mut state = GameState::from_level("3|3|0|19|19|19|0|31|5|19|19|19").expect("state");
    state.apply_action(Action::Right);
    assert_eq!(state.agent_index(), 5);
    assert_eq!(state.gems_collected(), 1);
    let signal = state.reward_signal();
    assert_ne!(signal & reward::COLLECT_DIAMOND, 0);
    assert_ne!(signal & reward::WALK_THROUGH_GATE_BLUE, 0);
}

#[test]
fn gate_with_blocked_far_side_is_impassable() {
    let mut state = GameState::from_level("3|3|0|0|28|19|19|19|19|19|19|19").expect("state");
    let before = state.hash();
    state.apply_action(Action::Right);
    assert_eq!(state.agent_index(), 0);
    assert_eq!(state.reward_signal(), 0);
    assert_eq!(state.hash(), before);
}

#[test]
fn serde_round_trip_preserves_state_and_hash() {
    let mut state = GameState::new(KEYED_ROOMS_14X14, &gravity_params()).expect("state");
    for step in 0..10 {
        state.apply_action(Action::ALL[step % Action::ALL.len()]);
    }

    let encoded = serde_json::to_string(&state).expect("serialize");
    let mut decoded: GameState = serde_json::from_str(&encoded).expect("deserialize");
    assert_eq!(decoded, state);
    assert_eq!(decoded.hash(), state.hash());

    // Restored states continue identically.
    state.apply_action(Action::Left);
    decoded.apply_action(Action::Left);
    assert_eq!(decoded, state);
}

#[test]
fn clones_evolve_independently() {
    let root = GameState::from_level("3|3|1|1|1|1|1|0|5|1|1|1").expect("state");
    let mut stepped = root.clone();
    stepped.apply_action(Action::Right);

    assert_ne!(stepped.hash(), root.hash());
    assert_eq!(root.gems_collected(), 0);
    assert_eq!(stepped.gems_collected(), 1);
}

#[test]
fn parallel_fanout_matches_sequential_expansion() {
    let root = GameState::new(KEYED_ROOMS_14X14, &gravity_params()).expect("state");

    let sequential: Vec<u64> = Action::ALL
        .iter()
        .map(|&action| {
            let mut child = root.clone();
            child.apply_action(action);
            child.hash()
        })
        .collect();

    let parallel: Vec<u64> = Action::ALL
        .par_iter()
        .map(|&action| {
            let mut child = root.clone();
            child.apply_action(action);
            child.hash()
        })
        .collect();

    assert_eq!(sequential, parallel);
}

#[test]
fn terminal_states_latch_and_keep_hash_consistent() {
    let mut state = GameState::new("3|3|0|1|3|1|1|1|1|1|0|1", &gravity_params()).expect("state");
    state.apply_action(Action::Down);
    state.apply_action(Action::Down);
    assert!(state.is_terminal());

    for step in 0..12 {
        state.apply_action(Action::ALL[step % Action::ALL.len()]);
        assert!(state.is_terminal(), "terminality must latch");
        assert_eq!(state.hash(), recomputed_hash(&state));
    }
}

#[test]
fn equal_states_share_search_hash() {
    let state_a = GameState::from_level(KEYED_ROOMS_14X14).expect("state_a");
    let state_b = GameState::from_level(KEYED_ROOMS_14X14).expect("state_b");
    let mut frontier = HashSet::new();
    frontier.insert(state_a);
    frontier.insert(state_b);
    assert_eq!(frontier.len(), 1);
}
