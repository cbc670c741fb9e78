//! Translation of proof payloads into commands.
//!
//! The order matters: headers come before anything that refers to them,
//! and the endorsement comes last so its block of proof is known.

use std::iter;
use std::sync::Arc;

use pop_common::{AltBlock, AltHash, AltPayloads, BtcEndorsement, VbkBlock, VbkEndorsement, Vtb};

use crate::add_block::AddBlock;
use crate::add_endorsement::AddEndorsement;
use crate::add_vtb::AddVtb;
use crate::command::{AltCommand, VbkCommand};

/// BTC context and block of proof, then the BTC endorsement.
pub fn vtb_to_commands(vtb: &Vtb) -> Vec<VbkCommand> {
    let tx = &vtb.transaction;
    let mut commands: Vec<VbkCommand> = tx
        .block_of_proof_context
        .iter()
        .chain(iter::once(&tx.block_of_proof))
        .map(|block| VbkCommand::AddBtcBlock(AddBlock::new(Arc::new(block.clone()))))
        .collect();

    let endorsement = BtcEndorsement::from_vtb(vtb);
    commands.push(VbkCommand::AddBtcEndorsement(AddEndorsement::<VbkBlock>::new(
        endorsement.containing_hash,
        Arc::new(endorsement),
    )));
    commands
}

fn add_vbk_block(block: &VbkBlock) -> AltCommand {
    AltCommand::AddVbkBlock(AddBlock::new(Arc::new(block.clone())))
}

/// Commands for the payloads of the ALT block `containing`: VBK context,
/// each VTB behind its containing VBK block, the ATV context and
/// containing block, then the VBK endorsement.
pub fn alt_payloads_to_commands(containing: AltHash, payloads: &AltPayloads) -> Vec<AltCommand> {
    let mut commands: Vec<AltCommand> = payloads.vbk_context.iter().map(add_vbk_block).collect();

    for vtb in &payloads.vtbs {
        commands.push(add_vbk_block(&vtb.containing_block));
        commands.push(AltCommand::AddVtb(AddVtb::new(Arc::new(vtb.clone()))));
    }

    commands.extend(payloads.atv.context.iter().map(add_vbk_block));
    commands.push(add_vbk_block(&payloads.atv.containing_block));

    let endorsement = VbkEndorsement::from_payloads(containing, payloads);
    commands.push(AltCommand::AddVbkEndorsement(AddEndorsement::<AltBlock>::new(
        containing,
        Arc::new(endorsement),
    )));
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandInfo;
    use pop_test_utils::{
        alt_genesis, alt_params, btc_params, make_alt_payloads, make_atv, make_vtb, mine_alt,
        mine_btc_chain, mine_vbk_chain, vbk_params,
    };

    #[test]
    fn vtb_commands_in_order() {
        let btc = mine_btc_chain(&btc_params().genesis_block, 3);
        let vbk = mine_vbk_chain(&vbk_params().genesis_block, 2);
        let vtb = make_vtb(&vbk[0], &btc[2], btc[..2].to_vec(), &vbk[1]);

        let commands = vtb_to_commands(&vtb);
        let described: Vec<String> = commands.iter().map(|c| c.describe()).collect();
        assert_eq!(described.len(), 4);
        assert!(described[0].contains(&btc[0].hash().to_string()));
        assert!(described[2].contains(&btc[2].hash().to_string()));
        assert!(described[3].starts_with("EndorseVbkBlock{"));
        match &commands[3] {
            VbkCommand::AddBtcEndorsement(c) => {
                assert_eq!(c.endorsement().endorsed_hash, vbk[0].hash());
                assert_eq!(c.endorsement().block_of_proof, btc[2].hash());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn alt_payload_commands_in_order() {
        let vbk = mine_vbk_chain(&vbk_params().genesis_block, 4);
        let btc = mine_btc_chain(&btc_params().genesis_block, 1);
        let endorsed = mine_alt(&alt_genesis());
        let containing = mine_alt(&endorsed);

        let vtb = make_vtb(&vbk[0], &btc[0], Vec::new(), &vbk[1]);
        let atv = make_atv(&alt_params(), &endorsed, b"miner", &vbk[3], vec![vbk[2].clone()]);
        let payloads = make_alt_payloads(&endorsed, atv, vec![vtb], vec![vbk[0].clone()]);

        let commands = alt_payloads_to_commands(containing.hash, &payloads);
        let kinds: Vec<&str> = commands
            .iter()
            .map(|c| match c {
                AltCommand::AddVbkBlock(_) => "block",
                AltCommand::AddVtb(_) => "vtb",
                AltCommand::AddVbkEndorsement(_) => "endorsement",
            })
            .collect();
        assert_eq!(kinds, vec!["block", "block", "vtb", "block", "block", "endorsement"]);

        let AltCommand::AddVbkEndorsement(endorse) = &commands[5] else {
            panic!("endorsement must come last");
        };
        assert_eq!(endorse.endorsement().containing_hash, containing.hash);
        assert_eq!(endorse.endorsement().payout_info, b"miner".to_vec());
        assert_eq!(endorse.endorsement().block_of_proof, vbk[3].hash());
    }
}
