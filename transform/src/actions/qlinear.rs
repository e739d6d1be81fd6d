//! Edge moves for the quantized replacement operators.
//!
//! Input layouts follow the operator schemas, e.g. `QLinearConv` takes
//! `x, x_scale, x_zp, w, w_scale, w_zp, y_scale, y_zp, B`.

use crate::group::NodeRole::{Input, Output, Target};
use crate::moves::{EdgeMove, q_params, qdq_triple};

/// `DQ -> op -> Q` collapsed onto the target (Reshape, Transpose, MaxPool, ...).
pub fn drop_qdq_moves() -> Vec<EdgeMove> {
    vec![EdgeMove::input(Input(0), 0, 0), EdgeMove::output(Output(0), 0, 0)]
}

/// `DQ -> op` collapsed onto the target (ArgMax).
pub fn drop_dq_moves() -> Vec<EdgeMove> {
    vec![EdgeMove::input(Input(0), 0, 0)]
}

/// `QLinear<Op>(x, x_scale, x_zp, y_scale, y_zp)`.
pub fn unary_moves() -> Vec<EdgeMove> {
    let mut moves = qdq_triple(Input(0), 0).to_vec();
    moves.extend(q_params(Output(0), 3));
    moves.push(EdgeMove::output(Output(0), 0, 0));
    moves
}

/// `QLinear<Op>(a, a_scale, a_zp, b, b_scale, b_zp, c_scale, c_zp)`.
pub fn binary_moves() -> Vec<EdgeMove> {
    let mut moves = qdq_triple(Input(0), 0).to_vec();
    moves.extend(qdq_triple(Input(1), 3));
    moves.extend(q_params(Output(0), 6));
    moves.push(EdgeMove::output(Output(0), 0, 0));
    moves
}

/// `QLinearWhere(condition, x, x_scale, x_zp, y, y_scale, y_zp, z_scale, z_zp)`.
pub fn where_moves() -> Vec<EdgeMove> {
    let mut moves = vec![EdgeMove::input(Target, 0, 0)];
    moves.extend(qdq_triple(Input(1), 1));
    moves.extend(qdq_triple(Input(2), 4));
    moves.extend(q_params(Output(0), 7));
    moves.push(EdgeMove::output(Output(0), 0, 0));
    moves
}

/// `QLinearConv(x, x_scale, x_zp, w, w_scale, w_zp, y_scale, y_zp, [bias])`.
pub fn conv_moves() -> Vec<EdgeMove> {
    let mut moves = binary_moves();
    moves.push(EdgeMove::input(Input(2), 0, 8).optional());
    moves
}

/// `QLinearConcat(y_scale, y_zp, (x_i, x_i_scale, x_i_zp)*)`.
pub fn concat_moves(inputs: usize) -> Vec<EdgeMove> {
    let mut moves = q_params(Output(0), 0).to_vec();
    for slot in 0..inputs {
        moves.extend(qdq_triple(Input(slot), 2 + 3 * slot));
    }
    moves.push(EdgeMove::output(Output(0), 0, 0));
    moves
}

/// `QLinearMatMul(a, a_scale, a_zp, b, b_scale, b_zp, y_scale, y_zp)`.
pub fn qlinear_matmul_moves() -> Vec<EdgeMove> {
    binary_moves()
}

/// `MatMulIntegerToFloat(a, b, a_scale, b_scale, [a_zp], [b_zp])` writing the MatMul's float output.
pub fn matmul_integer_to_float_moves() -> Vec<EdgeMove> {
    vec![
        EdgeMove::input(Input(0), 0, 0),
        EdgeMove::input(Input(1), 0, 1),
        EdgeMove::input(Input(0), 1, 2),
        EdgeMove::input(Input(1), 1, 3),
        EdgeMove::input(Input(0), 2, 4).optional(),
        EdgeMove::input(Input(1), 2, 5).optional(),
        EdgeMove::output(Target, 0, 0),
    ]
}

/// `QGemm(a, a_scale, a_zp, b, b_scale, b_zp, [c], [y_scale], [y_zp])`.
pub fn qgemm_moves(has_q: bool) -> Vec<EdgeMove> {
    let mut moves = qdq_triple(Input(0), 0).to_vec();
    moves.extend(qdq_triple(Input(1), 3));
    moves.push(EdgeMove::input(Input(2), 0, 6).optional());
    if has_q {
        moves.extend(q_params(Output(0), 7));
        moves.push(EdgeMove::output(Output(0), 0, 0));
    } else {
        moves.push(EdgeMove::output(Target, 0, 0));
    }
    moves
}

/// `Split(x_q, [split]) -> y_q*`.
pub fn split_moves(outputs: usize) -> Vec<EdgeMove> {
    let mut moves = vec![EdgeMove::input(Input(0), 0, 0), EdgeMove::input(Target, 1, 1).optional()];
    moves.extend((0..outputs).map(|slot| EdgeMove::output(Output(slot), 0, slot)));
    moves
}
