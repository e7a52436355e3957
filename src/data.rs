use once_cell::sync::Lazy;
use std::collections::HashMap;

/// ENDF MT numbers mapped to their reaction names, used for diagnostics.
pub static REACTION_NAME: Lazy<HashMap<i32, &'static str>> = Lazy::new(|| {
    let mut map: HashMap<i32, &'static str> = [
        (1, "(n,total)"),
        (2, "(n,elastic)"),
        (3, "(n,nonelastic)"),
        (4, "(n,level)"),
        (5, "(n,misc)"),
        (16, "(n,2n)"),
        (17, "(n,3n)"),
        (18, "(n,fission)"),
        (22, "(n,na)"),
        (24, "(n,2na)"),
        (27, "(n,absorption)"),
        (28, "(n,np)"),
        (32, "(n,nd)"),
        (33, "(n,nt)"),
        (37, "(n,4n)"),
        (91, "(n,nc)"),
        (101, "(n,disappear)"),
        (102, "(n,gamma)"),
        (103, "(n,p)"),
        (104, "(n,d)"),
        (105, "(n,t)"),
        (106, "(n,3He)"),
        (107, "(n,a)"),
        (108, "(n,2a)"),
        (111, "(n,2p)"),
        (112, "(n,pa)"),
    ]
    .into_iter()
    .collect();
    // Discrete inelastic levels (n,n1)..(n,n40)
    const LEVELS: [&str; 40] = [
        "(n,n1)", "(n,n2)", "(n,n3)", "(n,n4)", "(n,n5)", "(n,n6)", "(n,n7)", "(n,n8)",
        "(n,n9)", "(n,n10)", "(n,n11)", "(n,n12)", "(n,n13)", "(n,n14)", "(n,n15)",
        "(n,n16)", "(n,n17)", "(n,n18)", "(n,n19)", "(n,n20)", "(n,n21)", "(n,n22)",
        "(n,n23)", "(n,n24)", "(n,n25)", "(n,n26)", "(n,n27)", "(n,n28)", "(n,n29)",
        "(n,n30)", "(n,n31)", "(n,n32)", "(n,n33)", "(n,n34)", "(n,n35)", "(n,n36)",
        "(n,n37)", "(n,n38)", "(n,n39)", "(n,n40)",
    ];
    for (i, name) in LEVELS.iter().enumerate() {
        map.insert(51 + i as i32, name);
    }
    map.insert(50, "(n,n0)");
    map
});

/// MTs summed into MT 4 (total inelastic).
pub const INELASTIC_CONSTITUENT_MTS: std::ops::Range<i32> = 50..92;

/// MTs summed into MT 101 (disappearance).
pub const DISAPPEARANCE_MTS: std::ops::Range<i32> = 102..118;

/// Label like `MT 102 (n,gamma)`; unknown MTs get the bare number.
pub fn reaction_label(mt: i32) -> String {
    match REACTION_NAME.get(&mt) {
        Some(name) => format!("MT {} {}", mt, name),
        None => format!("MT {}", mt),
    }
}
