// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Functional check of the tile stream.
//!
//! Every multiply a tile would perform is replayed into an output tensor,
//! which is then compared with a direct computation of the layer. This
//! catches any window, filter or schedule bookkeeping error in the engine.

use approx::relative_eq;
use tessel_dataflow::layer::LayerKind;
use tessel_dataflow::tensor::{Tensor, Value};
use tessel_dataflow::tile::TileData;
use tessel_engine::sim_error;
use tessel_engine::types::{SimError, SimResult};

use crate::network::Layer;

/// Accumulate the products of every valid tile into `output`
/// (`[filters, out_x, out_y]`).
pub fn calculate_output<T: Value>(output: &mut Tensor<f64>, tiles: &[TileData<T>]) -> SimResult {
    for tile in tiles.iter().filter(|tile| tile.valid) {
        let lanes = tile.lanes;
        for (r, filter) in tile.filters.iter().enumerate() {
            let Some(filter) = *filter else {
                continue;
            };
            for entry in &tile.wgt_row[r * lanes..(r + 1) * lanes] {
                if entry.value.is_zero() {
                    continue;
                }
                let Some(time_h) = entry.time.checked_sub(tile.time) else {
                    return sim_error!(format!(
                        "weight from step {} issued at later step {}",
                        entry.time, tile.time
                    ));
                };
                let Some(act_row) = tile.act_rows.get(time_h) else {
                    return sim_error!(format!(
                        "weight from step {} outside the {} activation rows of step {}",
                        entry.time,
                        tile.act_rows.len(),
                        tile.time
                    ));
                };

                let wgt: f64 = entry.value.into();
                for (w, &(x, y)) in tile.windows.iter().enumerate() {
                    let act: f64 = act_row[w * lanes + entry.lane].value.into();
                    let index = [filter, x, y];
                    output.set(&index, output.get(&index) + wgt * act);
                }
            }
        }
    }
    Ok(())
}

/// Compute `batch` of `layer` directly from its tensors.
#[must_use]
pub fn reference_output(layer: &Layer, batch: usize) -> Tensor<f64> {
    let num_filters = layer.num_filters();
    let [channels, kx, ky] = [
        layer.wgt.shape()[1],
        layer.wgt.shape()[2],
        layer.wgt.shape()[3],
    ];
    let mut output = Tensor::zeros(&[num_filters, layer.out_x, layer.out_y]);

    match layer.kind {
        LayerKind::Recurrent => {
            for m in 0..num_filters {
                let mut sum = 0.0;
                for step in 0..layer.recurrence {
                    for c in 0..channels {
                        let wgt: f64 = layer.wgt.get(&[m, c, 0, 0]).into();
                        let act: f64 = layer.act.get(&[step, batch, c]).into();
                        sum += wgt * act;
                    }
                }
                output.set(&[m, 0, 0], sum);
            }
        }
        _ => {
            let two_tower = layer.act.shape()[1] == 2 * channels;
            let filters_per_group = if two_tower {
                num_filters.div_ceil(2)
            } else {
                num_filters
            };
            for m in 0..num_filters {
                let start_group = if m >= filters_per_group { channels } else { 0 };
                for x in 0..layer.out_x {
                    for y in 0..layer.out_y {
                        let mut sum = 0.0;
                        for c in 0..channels {
                            for i in 0..kx {
                                for j in 0..ky {
                                    let wgt: f64 = layer.wgt.get(&[m, c, i, j]).into();
                                    let act: f64 = layer
                                        .act
                                        .get(&[
                                            batch,
                                            start_group + c,
                                            x * layer.stride + i,
                                            y * layer.stride + j,
                                        ])
                                        .into();
                                    sum += wgt * act;
                                }
                            }
                        }
                        output.set(&[m, x, y], sum);
                    }
                }
            }
        }
    }
    output
}

/// Compare the replayed output with the reference.
pub fn check_result(layer: &Layer, batch: usize, output: &Tensor<f64>) -> SimResult {
    let expected = reference_output(layer, batch);
    if expected.shape() != output.shape() {
        return Err(SimError(format!(
            "{}: output shape {:?} does not match {:?}",
            layer.name,
            output.shape(),
            expected.shape()
        )));
    }

    let mismatches = expected
        .data()
        .iter()
        .zip(output.data())
        .filter(|(e, o)| !relative_eq!(**e, **o, max_relative = 1e-10))
        .count();
    if mismatches > 0 {
        return sim_error!(format!(
            "{}: batch {batch} has {mismatches} mismatched outputs",
            layer.name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use tessel_dataflow::buffer::BufferEntry;

    use super::*;

    fn tiny_layer() -> Layer {
        Layer {
            name: "fc".to_string(),
            kind: LayerKind::FullyConnected,
            act: Rc::new(Tensor::from_vec(&[1, 2, 1, 1], vec![2.0, 3.0]).unwrap()),
            wgt: Rc::new(Tensor::from_vec(&[1, 2, 1, 1], vec![5.0, -1.0]).unwrap()),
            stride: 1,
            out_x: 1,
            out_y: 1,
            recurrence: 1,
        }
    }

    #[test]
    fn replayed_products_match_reference() {
        let layer = tiny_layer();
        let tile = TileData {
            valid: true,
            windows: vec![(0, 0)],
            filters: vec![Some(0)],
            act_rows: vec![vec![BufferEntry::new(2.0, 0, 0), BufferEntry::new(3.0, 0, 1)]],
            wgt_row: vec![BufferEntry::new(5.0, 0, 0), BufferEntry::new(-1.0, 0, 1)],
            time: 0,
            num_act_rows: 1,
            lanes: 2,
            ..Default::default()
        };

        let mut output = Tensor::zeros(&[1, 1, 1]);
        calculate_output(&mut output, &[tile]).unwrap();
        assert_eq!(output.get(&[0, 0, 0]), 7.0);
        check_result(&layer, 0, &output).unwrap();

        let wrong = Tensor::zeros(&[1, 1, 1]);
        assert!(check_result(&layer, 0, &wrong).is_err());
    }

    #[test]
    fn weights_from_the_past_are_errors() {
        let tile = TileData {
            valid: true,
            windows: vec![(0, 0)],
            filters: vec![Some(0)],
            act_rows: vec![vec![BufferEntry::new(1.0, 1, 0)]],
            wgt_row: vec![BufferEntry::new(1.0, 0, 0)],
            time: 1,
            num_act_rows: 1,
            lanes: 1,
            ..Default::default()
        };
        let mut output = Tensor::zeros(&[1, 1, 1]);
        assert!(calculate_output(&mut output, &[tile]).is_err());
    }
}
