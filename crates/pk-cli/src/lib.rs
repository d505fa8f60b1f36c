//! Terminal formatting for `pokelink watch` and `pokelink replay`.

use std::fmt::Write;

use pk_core::Snapshot;

/// One status line per snapshot
pub fn summarize(snapshot: &Snapshot) -> String {
    let mut line = format!(
        "frame {:>8}  map {:>3} ({:>3},{:>3})  party {}  badges {}  dex {}/{}  ${}",
        snapshot.frame,
        snapshot.map,
        snapshot.x,
        snapshot.y,
        snapshot.party_count,
        snapshot.badges,
        snapshot.pokedex_owned,
        snapshot.pokedex_seen,
        snapshot.money,
    );
    if snapshot.text_box_id != 0 {
        let _ = write!(line, "  text {}", snapshot.text_box_id);
    }
    if let Some(enemy) = snapshot.enemy() {
        let _ = write!(
            line,
            "  battle {:?} vs #{} L{} {}/{}",
            snapshot.in_battle, enemy.enemy_species, enemy.enemy_level, enemy.enemy_hp, enemy.enemy_max_hp
        );
    }
    line
}

/// Party listing, one line per occupied slot
pub fn party_lines(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .occupied_slots()
        .map(|(slot, mon)| {
            let mut line = format!(
                "  {}: #{:<3} L{:<3} HP {:>3}/{:<3} moves {:?}",
                slot + 1,
                mon.species,
                mon.level,
                mon.hp,
                mon.max_hp,
                mon.moves
            );
            if mon.is_fainted() {
                line.push_str(" (fainted)");
            } else if !mon.status.is_empty() {
                let _ = write!(line, " status {:#04x}", mon.status.bits());
            }
            line
        })
        .collect()
}
