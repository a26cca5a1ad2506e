// SPDX-License-Identifier: Apache-2.0

//! Variable inlining: consumers of a variable with a known whole-width
//! driver are relinked to consume the driver directly. The variable keeps
//! its driver edge, so externally visible variables still get their
//! assignment on conversion; locally dead ones are cleaned up by redundant
//! variable removal afterwards.

use crate::dfg::DfgGraph;

pub fn inline_vars(dfg: &mut DfgGraph) {
    let mut cursor = dfg.head();
    while let Some(vtx) = cursor {
        cursor = dfg.next_of(vtx);
        if !dfg.is_var(vtx) {
            continue;
        }
        if let Some(driver) = dfg.full_driver(vtx) {
            if dfg.has_sinks(vtx) {
                dfg.replace_with(vtx, driver);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarId;
    use crate::kind::BinaryOp;
    use crate::loc::Loc;

    #[test]
    fn test_consumers_read_through_chain() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let x = dfg.new_var(VarId(1), "x", 4, Loc::none());
        dfg.relink_source(x, 0, Some(a));
        let y = dfg.new_var(VarId(2), "y", 4, Loc::none());
        dfg.relink_source(y, 0, Some(x));
        let xor = dfg.new_binary(BinaryOp::Xor, 4, Loc::none());
        dfg.relink_source(xor, 0, Some(y));
        dfg.relink_source(xor, 1, Some(a));
        let o = dfg.new_var(VarId(3), "o", 4, Loc::none());
        dfg.relink_source(o, 0, Some(xor));

        inline_vars(&mut dfg);
        dfg.debug_check();
        // The operation reads 'a' directly; x and y keep their drivers.
        assert_eq!(dfg.source(xor, 0), Some(a));
        assert_eq!(dfg.source(x, 0), Some(a));
        assert_eq!(dfg.source(y, 0), Some(a));
        // 'o' is itself only a consumer of xor via its driver edge.
        assert_eq!(dfg.source(o, 0), Some(xor));
    }
}
