mod test_alpha_shape;
