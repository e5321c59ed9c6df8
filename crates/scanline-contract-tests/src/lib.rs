#![forbid(unsafe_code)]

#[cfg(test)]
mod support;


#[cfg(test)]
mod properties;

#[cfg(test)]
mod scenarios;
