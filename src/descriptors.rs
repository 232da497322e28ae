use crate::{
    error::{BridgeError, InvariantViolation},
    transaction::{TxInputRecord, TxOutputRecord},
    types::{ChangeSpec, KeyLocator, SignDescriptor, Utxo},
};

pub type Descriptors = (Vec<SignDescriptor>, Vec<SignDescriptor>);

/// 出金トランザクションの入力/出力記述子を構築する。
///
/// `target` と同じ script の出力は外部への支払いとして鍵無しで記述し、
/// それ以外の出力はおつりとみなして `change` の金額と一致することを確認する。
/// 送金先の出力が1つも無い場合や、不一致の場合はリクエストごと失敗する。
pub fn build_withdrawal_descriptors(
    inputs: &[TxInputRecord],
    utxos: &[Utxo],
    change: &ChangeSpec,
    target: &TxOutputRecord,
    outputs: &[TxOutputRecord],
) -> Result<Descriptors, BridgeError> {
    if inputs.len() != utxos.len() {
        return Err(InvariantViolation::UtxoCountMismatch {
            inputs: inputs.len(),
            utxos: utxos.len(),
        }
        .into());
    }

    let mut input_descs = Vec::with_capacity(utxos.len());
    for (input_index, utxo) in utxos.iter().enumerate() {
        if utxo.is_p2sh {
            return Err(InvariantViolation::ScriptHashInput { input_index }.into());
        }
        input_descs.push(SignDescriptor {
            key_loc: KeyLocator::layer_one(utxo.key_index),
            value_sat: utxo.amount_sat,
        });
    }

    let mut output_descs = Vec::with_capacity(outputs.len());
    let mut change_index: Option<usize> = None;
    let mut target_seen = false;
    for (output_index, output) in outputs.iter().enumerate() {
        if output.script_pubkey == target.script_pubkey {
            target_seen = true;
            output_descs.push(SignDescriptor {
                key_loc: KeyLocator::unknown(),
                value_sat: output.value_sat,
            });
            continue;
        }

        if let Some(first) = change_index {
            return Err(InvariantViolation::MultipleChangeOutputs { first, second: output_index }.into());
        }
        if output.value_sat != change.value_sat {
            return Err(InvariantViolation::ChangeValueMismatch {
                output_index,
                expected: change.value_sat,
                actual: output.value_sat,
            }
            .into());
        }
        change_index = Some(output_index);
        log::debug!(
            "出力 {} をおつり出力と判定しました: key_index={}, value={}",
            output_index,
            change.key_index,
            output.value_sat
        );
        output_descs.push(SignDescriptor {
            key_loc: KeyLocator::layer_one(change.key_index),
            value_sat: output.value_sat,
        });
    }

    if !target_seen {
        return Err(InvariantViolation::TargetOutputMissing.into());
    }

    Ok((input_descs, output_descs))
}

/// コミットメントトランザクション用の仮の記述子。
///
/// リモートの funding 鍵と出力の所有判定がまだモデル化されていないため、
/// すべて `unknown` で埋める。これをそのまま署名根拠にしてはならない。
pub fn build_commitment_descriptors(inputs: &[TxInputRecord], outputs: &[TxOutputRecord]) -> Descriptors {
    let input_descs = inputs
        .iter()
        .map(|_| SignDescriptor { key_loc: KeyLocator::unknown(), value_sat: 0 })
        .collect();
    let output_descs = outputs
        .iter()
        .map(|output| SignDescriptor {
            key_loc: KeyLocator::unknown(),
            value_sat: output.value_sat,
        })
        .collect();
    (input_descs, output_descs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyFamily;
    use bitcoin::hashes::Hash;
    use bitcoin::{ScriptBuf, Txid, Witness};

    fn input() -> TxInputRecord {
        TxInputRecord {
            prev_txid: Txid::from_byte_array([7; 32]),
            prev_index: 0,
            script_sig: ScriptBuf::new(),
            sequence: 0xFFFF_FFFF,
            witness: Witness::new(),
        }
    }

    fn output(value_sat: u64, fill: u8) -> TxOutputRecord {
        TxOutputRecord {
            value_sat,
            script_pubkey: ScriptBuf::from_bytes([&[0x00, 0x14][..], &[fill; 20][..]].concat()),
        }
    }

    fn utxo(key_index: u32, amount_sat: u64) -> Utxo {
        Utxo { key_index, amount_sat, is_p2sh: false }
    }

    #[test]
    fn single_input_with_change() {
        let target = output(90_000, 0xAA);
        let outputs = vec![output(90_000, 0xAA), output(9_000, 0xCC)];
        let change = ChangeSpec { key_index: 7, value_sat: 9_000 };

        let (ins, outs) =
            build_withdrawal_descriptors(&[input()], &[utxo(5, 100_000)], &change, &target, &outputs).unwrap();

        assert_eq!(
            ins,
            vec![SignDescriptor { key_loc: KeyLocator::layer_one(5), value_sat: 100_000 }]
        );
        assert_eq!(
            outs,
            vec![
                SignDescriptor { key_loc: KeyLocator::unknown(), value_sat: 90_000 },
                SignDescriptor { key_loc: KeyLocator::layer_one(7), value_sat: 9_000 },
            ]
        );
    }

    #[test]
    fn descriptor_counts_follow_inputs_and_outputs() {
        let target = output(50_000, 0xAA);
        let inputs = vec![input(), input(), input()];
        let utxos = vec![utxo(1, 20_000), utxo(2, 20_000), utxo(3, 20_000)];
        let outputs = vec![output(1_000, 0xCC), output(50_000, 0xAA)];
        let change = ChangeSpec { key_index: 9, value_sat: 1_000 };

        let (ins, outs) = build_withdrawal_descriptors(&inputs, &utxos, &change, &target, &outputs).unwrap();
        assert_eq!(ins.len(), inputs.len());
        assert_eq!(outs.len(), outputs.len());
        assert_eq!(outs[0].key_loc.key_family, KeyFamily::LayerOne);
        assert_eq!(outs[1].key_loc.key_family, KeyFamily::Unknown);
    }

    #[test]
    fn no_change_output_is_fine() {
        let target = output(99_000, 0xAA);
        let (_, outs) = build_withdrawal_descriptors(
            &[input()],
            &[utxo(0, 100_000)],
            &ChangeSpec { key_index: 0, value_sat: 0 },
            &target,
            &[output(99_000, 0xAA)],
        )
        .unwrap();
        assert!(outs.iter().all(|d| d.key_loc == KeyLocator::unknown()));
    }

    #[test]
    fn script_hash_input_is_rejected() {
        let target = output(90_000, 0xAA);
        let utxos = vec![utxo(1, 50_000), Utxo { key_index: 2, amount_sat: 50_000, is_p2sh: true }];
        let err = build_withdrawal_descriptors(
            &[input(), input()],
            &utxos,
            &ChangeSpec { key_index: 7, value_sat: 9_000 },
            &target,
            &[output(90_000, 0xAA)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Invariant(InvariantViolation::ScriptHashInput { input_index: 1 })
        ));
    }

    #[test]
    fn change_amount_mismatch_is_rejected() {
        let target = output(90_000, 0xAA);
        let err = build_withdrawal_descriptors(
            &[input()],
            &[utxo(5, 100_000)],
            &ChangeSpec { key_index: 7, value_sat: 9_000 },
            &target,
            &[output(90_000, 0xAA), output(9_500, 0xCC)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Invariant(InvariantViolation::ChangeValueMismatch {
                output_index: 1,
                expected: 9_000,
                actual: 9_500
            })
        ));
    }

    #[test]
    fn two_non_target_outputs_are_rejected() {
        let target = output(80_000, 0xAA);
        let err = build_withdrawal_descriptors(
            &[input()],
            &[utxo(5, 100_000)],
            &ChangeSpec { key_index: 7, value_sat: 9_000 },
            &target,
            &[output(80_000, 0xAA), output(9_000, 0xCC), output(9_000, 0xDD)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Invariant(InvariantViolation::MultipleChangeOutputs { first: 1, second: 2 })
        ));
    }

    #[test]
    fn utxo_count_must_match_inputs() {
        let target = output(90_000, 0xAA);
        let err = build_withdrawal_descriptors(
            &[input(), input()],
            &[utxo(5, 100_000)],
            &ChangeSpec { key_index: 7, value_sat: 9_000 },
            &target,
            &[output(90_000, 0xAA)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Invariant(InvariantViolation::UtxoCountMismatch { inputs: 2, utxos: 1 })
        ));
    }

    #[test]
    fn transaction_without_target_output_is_rejected() {
        let target = output(90_000, 0xAA);
        let err = build_withdrawal_descriptors(
            &[input()],
            &[utxo(5, 100_000)],
            &ChangeSpec { key_index: 7, value_sat: 9_000 },
            &target,
            &[output(9_000, 0xEE)],
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Invariant(InvariantViolation::TargetOutputMissing)));
    }

    #[test]
    fn commitment_descriptors_are_placeholders() {
        let (ins, outs) = build_commitment_descriptors(&[input()], &[output(600, 0x01), output(400, 0x02)]);
        assert_eq!(ins.len(), 1);
        assert_eq!(outs.len(), 2);
        assert!(ins.iter().chain(outs.iter()).all(|d| d.key_loc.key_family == KeyFamily::Unknown));
        assert_eq!(outs[1].value_sat, 400);
    }
}
